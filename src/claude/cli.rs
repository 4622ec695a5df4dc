//! Claude Code CLI command builder
//!
//! Constructs the `std::process::Command` for one agent run: the prompt as a
//! single discrete argument, streaming JSON output flags, a validated model,
//! an optional validated `--resume`, and the environment contract read by the
//! permission hook.

use std::process::Command;

use super::runner::ExecutionRequest;
use crate::config::AgentSettings;

/// Environment variable carrying the permission broker's port
pub const PERMISSION_PORT_ENV: &str = "TETHER_PERMISSION_PORT";
/// Environment variable carrying the acting user's identifier
pub const USER_ID_ENV: &str = "TETHER_USER_ID";
/// Environment variable carrying the destination chat identifier
pub const CHAT_ID_ENV: &str = "TETHER_CHAT_ID";
/// Environment variable carrying the permission mode (`ask` or `full`)
pub const PERMISSION_MODE_ENV: &str = "TETHER_PERMISSION_MODE";

/// Markers that make Claude Code refuse to start as a nested session
const NESTED_SESSION_ENV: [&str; 2] = ["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

/// Model selectors accepted on the command line
pub const ALLOWED_MODELS: [&str; 7] = [
    "sonnet",
    "opus",
    "haiku",
    "claude-sonnet-4-5-20250514",
    "claude-opus-4-5-20250514",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
];

/// Model used when the requested one is not on the allow-list
pub const FALLBACK_MODEL: &str = "sonnet";

/// Return `requested` if it is an allowed model (case-insensitive), else the fallback.
#[must_use]
pub fn validate_model(requested: &str) -> &str {
    if ALLOWED_MODELS
        .iter()
        .any(|model| model.eq_ignore_ascii_case(requested))
    {
        requested
    } else {
        FALLBACK_MODEL
    }
}

/// A session ID is only passed through if it is non-empty ASCII alphanumerics, `-` or `_`.
#[must_use]
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Build extra CLI args for Claude Code to resume an existing session.
///
/// Returns `["--resume", "<session_id>"]` for a valid ID, or an empty `Vec`
/// (a fresh session) when there is no ID or it fails validation.
#[must_use]
pub fn resume_args(session_id: Option<&str>) -> Vec<String> {
    match session_id {
        Some(id) if is_valid_session_id(id) => vec!["--resume".to_string(), id.to_string()],
        Some(id) => {
            tracing::warn!(session_id = %id.escape_debug(), "dropping malformed resume session id");
            vec![]
        }
        None => vec![],
    }
}

/// Build a `Command` to invoke Claude Code for one request.
///
/// Does not set stdio or the working directory; the runner owns those.
#[must_use]
pub fn build_command(
    settings: &AgentSettings,
    request: &ExecutionRequest,
    broker_port: u16,
) -> Command {
    let mut cmd = Command::new(&settings.binary);

    cmd.arg("-p").arg(&request.message);
    cmd.arg("--output-format").arg("stream-json");
    cmd.arg("--verbose");

    let requested = request.model.as_deref().unwrap_or(&settings.model);
    cmd.arg("--model").arg(validate_model(requested));

    cmd.args(resume_args(request.resume_session.as_deref()));

    for var in NESTED_SESSION_ENV {
        cmd.env_remove(var);
    }
    cmd.env(PERMISSION_PORT_ENV, broker_port.to_string());
    cmd.env(USER_ID_ENV, &request.user_id);
    cmd.env(CHAT_ID_ENV, &request.chat_id);
    cmd.env(PERMISSION_MODE_ENV, request.permission_mode.as_str());

    cmd
}
