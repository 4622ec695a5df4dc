//! Shared test utilities
//!
//! Common helpers used across test modules. Only compiled in test builds.

use std::path::{Path, PathBuf};

use serde_json::json;

/// Write an executable `sh` script named `fake-agent` into `dir`.
///
/// The script ignores its arguments and runs `body`, standing in for the
/// agent CLI in runner tests.
#[cfg(unix)]
#[must_use]
pub fn fake_agent(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-agent");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// An `assistant` stream-json line with one text block
#[must_use]
pub fn text_line(text: &str) -> String {
    json!({"type": "assistant", "message": {"content": [{"type": "text", "text": text}]}})
        .to_string()
}

/// An `assistant` stream-json line with one `tool_use` block
#[must_use]
pub fn tool_line(name: &str) -> String {
    json!({"type": "assistant", "message": {"content": [{"type": "tool_use", "name": name, "input": {}}]}})
        .to_string()
}

/// A `result` stream-json line
#[must_use]
pub fn result_line(text: &str, session_id: &str) -> String {
    json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": text,
        "session_id": session_id,
        "total_cost_usd": 0.01,
        "duration_ms": 1500
    })
    .to_string()
}
