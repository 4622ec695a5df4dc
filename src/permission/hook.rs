//! PreToolUse hook installation
//!
//! The agent CLI asks its PreToolUse hooks before every tool call. The hook
//! installed here forwards the question to the broker whose port is exported
//! in `TETHER_PERMISSION_PORT`, and stays out of the way when that variable is
//! unset so the agent behaves normally outside tether.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use super::broker::DEFAULT_PERMISSION_TIMEOUT;

/// File name of the installed script; also used to recognise our entry in
/// the agent settings
pub const HOOK_FILE_NAME: &str = "permission-hook.sh";

/// Tools the hook allows without asking.
///
/// All of them are read-only or only talk back to the user.
pub const SAFE_TOOLS: &[&str] = &[
    "Read",
    "read_file",
    "Glob",
    "glob",
    "Grep",
    "grep",
    "ListDirectory",
    "list_directory",
    "WebSearch",
    "WebFetch",
    "TodoWrite",
    "Task",
    "AskUserQuestion",
];

const SCRIPT_TEMPLATE: &str = r##"#!/usr/bin/env bash
# tether permission hook (PreToolUse)
set -u

PAYLOAD="$(cat)"

# Not launched by tether: let the agent decide on its own.
if [ -z "${TETHER_PERMISSION_PORT:-}" ]; then
    exit 0
fi

respond() {
    printf '{"hookSpecificOutput":{"hookEventName":"PreToolUse","permissionDecision":"%s","permissionDecisionReason":"%s"}}\n' "$1" "$2"
    exit 0
}

if [ "${TETHER_PERMISSION_MODE:-ask}" = "full" ]; then
    respond allow "full access mode"
fi

TOOL_NAME="$(printf '%s' "$PAYLOAD" | python3 -c 'import json,sys; print(json.load(sys.stdin).get("tool_name", ""))' 2>/dev/null)"

case "$TOOL_NAME" in
    __SAFE_TOOLS__)
        respond allow "read-only tool"
        ;;
esac

REQUEST_ID="$(cat /proc/sys/kernel/random/uuid 2>/dev/null || uuidgen 2>/dev/null || date +%s%N)"

BODY="$(printf '%s' "$PAYLOAD" | python3 -c '
import json, os, sys
payload = json.load(sys.stdin)
print(json.dumps({
    "userId": os.environ.get("TETHER_USER_ID", ""),
    "chatId": os.environ.get("TETHER_CHAT_ID", ""),
    "toolName": payload.get("tool_name", ""),
    "toolInput": payload,
    "requestId": sys.argv[1],
}))' "$REQUEST_ID" 2>/dev/null)" || respond deny "could not read hook payload"

RESPONSE="$(curl -s --max-time __MAX_TIME__ -X POST \
    -H 'Content-Type: application/json' \
    -d "$BODY" \
    "http://127.0.0.1:${TETHER_PERMISSION_PORT}/permission")" || respond deny "permission broker unreachable"

DECISION="$(printf '%s' "$RESPONSE" | python3 -c 'import json,sys; print(json.load(sys.stdin).get("decision", "deny"))' 2>/dev/null)"

if [ "$DECISION" = "allow" ]; then
    respond allow "approved by user"
fi
respond deny "denied by user"
"##;

/// Render the hook script.
///
/// `curl` gets a few seconds more than the broker's own timeout so the
/// broker's deny arrives before the transport gives up.
#[must_use]
pub fn render_script(permission_timeout: Duration) -> String {
    let max_time = permission_timeout.as_secs() + 5;
    SCRIPT_TEMPLATE
        .replace("__SAFE_TOOLS__", &SAFE_TOOLS.join("|"))
        .replace("__MAX_TIME__", &max_time.to_string())
}

/// Result of an install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInstallation {
    /// Where the script was written
    pub script_path: PathBuf,
    /// Agent settings file that references it
    pub settings_path: PathBuf,
    /// Whether an existing tether entry was updated rather than added
    pub replaced_existing: bool,
}

/// Writes the hook script and registers it with the agent.
#[derive(Debug, Clone)]
pub struct HookInstaller {
    hooks_dir: PathBuf,
    settings_path: PathBuf,
    permission_timeout: Duration,
}

impl HookInstaller {
    /// Installer with explicit locations
    #[must_use]
    pub const fn new(hooks_dir: PathBuf, settings_path: PathBuf) -> Self {
        Self {
            hooks_dir,
            settings_path,
            permission_timeout: DEFAULT_PERMISSION_TIMEOUT,
        }
    }

    /// Installer for the current user: `~/.tether/hooks` and
    /// `~/.claude/settings.json`
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(Self::new(
            home.join(".tether").join("hooks"),
            home.join(".claude").join("settings.json"),
        ))
    }

    /// Match the script's transport timeout to the broker's
    #[must_use]
    pub const fn with_permission_timeout(mut self, timeout: Duration) -> Self {
        self.permission_timeout = timeout;
        self
    }

    /// Path the script is written to
    #[must_use]
    pub fn script_path(&self) -> PathBuf {
        self.hooks_dir.join(HOOK_FILE_NAME)
    }

    /// Write the script and register it. Safe to run repeatedly.
    pub fn install(&self) -> Result<HookInstallation> {
        let script_path = self.write_script()?;
        let replaced_existing = self.register(&script_path)?;

        tracing::info!(
            script = %script_path.display(),
            settings = %self.settings_path.display(),
            replaced_existing,
            "permission hook installed"
        );

        Ok(HookInstallation {
            script_path,
            settings_path: self.settings_path.clone(),
            replaced_existing,
        })
    }

    fn write_script(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.hooks_dir).with_context(|| {
            format!("Failed to create hooks directory {}", self.hooks_dir.display())
        })?;

        let path = self.script_path();
        std::fs::write(&path, render_script(self.permission_timeout))
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .with_context(|| format!("Failed to make {} executable", path.display()))?;
        }

        Ok(path)
    }

    fn register(&self, script_path: &Path) -> Result<bool> {
        let mut settings = read_settings(&self.settings_path)?;
        let command = script_path.to_string_lossy();
        let replaced = register_hook(&mut settings, &command)?;

        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let rendered =
            serde_json::to_string_pretty(&settings).context("Failed to serialize settings")?;
        std::fs::write(&self.settings_path, rendered + "\n")
            .with_context(|| format!("Failed to write {}", self.settings_path.display()))?;

        Ok(replaced)
    }
}

fn read_settings(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Ok(json!({}));
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Add or update the tether entry under `hooks.PreToolUse`.
///
/// Returns `true` when an existing entry was updated. Everything else in
/// `settings` is left as it was.
pub fn register_hook(settings: &mut Value, command: &str) -> Result<bool> {
    let Some(root) = settings.as_object_mut() else {
        bail!("Agent settings must be a JSON object");
    };
    let Some(hooks) = root
        .entry("hooks")
        .or_insert_with(|| json!({}))
        .as_object_mut()
    else {
        bail!("\"hooks\" in agent settings must be an object");
    };
    let Some(pre_tool_use) = hooks
        .entry("PreToolUse")
        .or_insert_with(|| json!([]))
        .as_array_mut()
    else {
        bail!("\"hooks.PreToolUse\" in agent settings must be an array");
    };

    for entry in pre_tool_use.iter_mut() {
        let Some(inner) = entry.get_mut("hooks").and_then(Value::as_array_mut) else {
            continue;
        };
        for hook in inner.iter_mut() {
            let is_ours = hook
                .get("command")
                .and_then(Value::as_str)
                .is_some_and(|c| c.contains(HOOK_FILE_NAME));
            if is_ours {
                hook["command"] = Value::String(command.to_string());
                return Ok(true);
            }
        }
    }

    pre_tool_use.push(json!({
        "matcher": "",
        "hooks": [{"type": "command", "command": command}]
    }));
    Ok(false)
}
