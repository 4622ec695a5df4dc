//! tether - run a coding agent CLI with a human in the loop
//!
//! tether launches the agent as a supervised child process, streams its
//! stream-JSON output as typed events, and answers the agent's PreToolUse
//! hook through a loopback permission broker so a person can approve or
//! deny each tool call. At most one run per user is in flight at a time.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod claude;
pub mod cli;
pub mod config;
pub mod log;
pub mod permission;

#[cfg(test)]
pub mod testutil;

// Re-export commonly used types
pub use claude::cli::build_command;
pub use claude::runner::{AgentRunner, ExecutionRequest, RunFailure};
pub use claude::session::{SessionGuard, SessionLocks};
pub use claude::stream::{parse_event, ExecutionResult, StreamAccumulator, StreamEvent};
pub use config::{PermissionMode, TetherConfig};
pub use log::{JsonlLogger, RunRecord};
pub use permission::{PermissionBroker, PermissionNotifier, PermissionRequest};
