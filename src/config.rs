//! Configuration parser
//!
//! Parses `tether.toml` into agent and permission settings. Every key has a
//! default, so an empty file (or no file at all) is a valid configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// How the permission hook treats privileged tool calls
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Ask a human through the permission broker
    #[default]
    Ask,
    /// Allow every tool without asking
    Full,
}

impl PermissionMode {
    /// Value exported to the agent process and read by the hook script
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ask => "ask",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for launching the agent CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentSettings {
    /// Path or name of the agent binary
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Default model selector, validated against the allow-list at launch
    #[serde(default = "default_model")]
    pub model: String,
    /// Hard wall-clock budget for one run, in seconds (default: 600)
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
    /// Permission mode passed to the hook
    #[serde(default)]
    pub permission_mode: PermissionMode,
}

fn default_binary() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

const fn default_max_timeout_secs() -> u64 {
    600
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            model: default_model(),
            max_timeout_secs: default_max_timeout_secs(),
            permission_mode: PermissionMode::default(),
        }
    }
}

impl AgentSettings {
    /// Run budget as a `Duration`
    #[must_use]
    pub const fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }
}

/// Settings for the permission broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionSettings {
    /// How long a hook request waits for a decision, in seconds (default: 120)
    #[serde(default = "default_permission_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_permission_timeout_secs() -> u64 {
    120
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_permission_timeout_secs(),
        }
    }
}

impl PermissionSettings {
    /// Decision budget as a `Duration`
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Top-level configuration parsed from tether.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TetherConfig {
    /// Agent launch settings
    #[serde(default)]
    pub agent: AgentSettings,
    /// Permission broker settings
    #[serde(default)]
    pub permission: PermissionSettings,
}

impl TetherConfig {
    /// Parse a tether.toml file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load the config at `path`, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_path(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse tether.toml content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse tether.toml")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.binary.trim().is_empty() {
            bail!("agent.binary cannot be empty");
        }
        if self.agent.max_timeout_secs == 0 {
            bail!("agent.max_timeout_secs must be greater than zero");
        }
        if self.permission.timeout_secs == 0 {
            bail!("permission.timeout_secs must be greater than zero");
        }
        Ok(())
    }
}
