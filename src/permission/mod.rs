//! Human-in-the-loop tool permissions
//!
//! The agent's PreToolUse hook posts each tool call to a loopback broker,
//! which holds the request until someone decides or the timeout denies it.

pub mod broker;
pub mod hook;
pub mod request;

pub use broker::{ChannelNotifier, PermissionBroker, PermissionNotifier, DEFAULT_PERMISSION_TIMEOUT};
pub use hook::{HookInstallation, HookInstaller};
pub use request::{Decision, PermissionRequest, PermissionResponse, ToolInput};
