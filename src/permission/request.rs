//! Permission request and response types
//!
//! The hook posts `{userId, chatId, toolName, toolInput, requestId}`. User and
//! chat IDs arrive as JSON numbers from the shell hook but are kept as opaque
//! strings. The tool input is narrowed to the handful of shapes worth showing
//! to a human, with a passthrough variant for everything else.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Body of `POST /permission` as sent by the hook
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionBody {
    /// Acting user
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: String,
    /// Destination chat
    #[serde(default, deserialize_with = "string_or_number")]
    pub chat_id: String,
    /// Tool the agent wants to call
    #[serde(default)]
    pub tool_name: String,
    /// Raw hook payload or tool input
    #[serde(default)]
    pub tool_input: Value,
    /// Caller-chosen ID, unique among pending requests
    #[serde(default)]
    pub request_id: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// A validated request for a human decision
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    /// Request ID, never empty
    pub request_id: String,
    /// Acting user
    pub user_id: String,
    /// Destination chat
    pub chat_id: String,
    /// Tool the agent wants to call
    pub tool_name: String,
    /// Tool arguments
    pub tool_input: ToolInput,
}

impl PermissionRequest {
    /// Validate a wire body. Returns `None` when the request ID is missing or blank.
    #[must_use]
    pub fn from_body(body: PermissionBody) -> Option<Self> {
        if body.request_id.trim().is_empty() {
            return None;
        }
        let tool_input = ToolInput::from_payload(&body.tool_name, body.tool_input);
        Some(Self {
            request_id: body.request_id,
            user_id: body.user_id,
            chat_id: body.chat_id,
            tool_name: body.tool_name,
            tool_input,
        })
    }

    /// One-line description for a prompt, e.g. `Bash: cargo test`
    #[must_use]
    pub fn summary(&self) -> String {
        match self.tool_input.summary() {
            Some(detail) => format!("{}: {detail}", self.tool_name),
            None => self.tool_name.clone(),
        }
    }
}

/// Tool arguments for the tools a human is usually asked about
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    /// Shell command (`Bash`)
    Shell {
        /// Command line to run
        command: String,
        /// Agent's description of the command
        description: Option<String>,
    },
    /// Whole-file write (`Write`)
    WriteFile {
        /// Target path
        file_path: String,
        /// New file contents
        content: String,
    },
    /// In-place edit (`Edit`, `MultiEdit`)
    EditFile {
        /// Target path
        file_path: String,
        /// Text being replaced
        old_string: String,
        /// Replacement text
        new_string: String,
    },
    /// Anything else, passed through untouched
    Other(Value),
}

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct WriteArgs {
    file_path: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct EditArgs {
    file_path: String,
    #[serde(default)]
    old_string: String,
    #[serde(default)]
    new_string: String,
}

impl ToolInput {
    /// Narrow a hook payload to a known tool shape.
    ///
    /// The hook forwards its whole stdin payload, which nests the arguments
    /// under `tool_input`; a bare argument object is accepted too.
    #[must_use]
    pub fn from_payload(tool_name: &str, payload: Value) -> Self {
        let args = match payload {
            Value::Object(mut map) if map.contains_key("tool_input") => {
                map.remove("tool_input").unwrap_or(Value::Null)
            }
            other => other,
        };

        let parsed = match tool_name {
            "Bash" | "bash" => serde_json::from_value::<ShellArgs>(args.clone())
                .ok()
                .map(|a| Self::Shell {
                    command: a.command,
                    description: a.description,
                }),
            "Write" | "write_file" => serde_json::from_value::<WriteArgs>(args.clone())
                .ok()
                .map(|a| Self::WriteFile {
                    file_path: a.file_path,
                    content: a.content,
                }),
            "Edit" | "MultiEdit" | "edit_file" => serde_json::from_value::<EditArgs>(args.clone())
                .ok()
                .map(|a| Self::EditFile {
                    file_path: a.file_path,
                    old_string: a.old_string,
                    new_string: a.new_string,
                }),
            _ => None,
        };

        parsed.unwrap_or(Self::Other(args))
    }

    /// Short human-readable detail, if the input has one
    #[must_use]
    pub fn summary(&self) -> Option<String> {
        match self {
            Self::Shell {
                command,
                description,
            } => Some(match description {
                Some(desc) if !desc.is_empty() => format!("{command} ({desc})"),
                _ => command.clone(),
            }),
            Self::WriteFile { file_path, content } => {
                Some(format!("{file_path} ({} lines)", content.lines().count()))
            }
            Self::EditFile { file_path, .. } => Some(file_path.clone()),
            Self::Other(Value::Null) => None,
            Self::Other(value) => {
                let raw = value.to_string();
                Some(truncate(&raw, 120))
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}

/// The hook's answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Let the tool call proceed
    Allow,
    /// Block the tool call
    Deny,
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Deny
        }
    }
}

/// Body of the `POST /permission` response
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionResponse {
    /// Final decision
    pub decision: Decision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> PermissionBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_body_accepts_numeric_ids() {
        let b = body(json!({
            "userId": 12345,
            "chatId": -100_200,
            "toolName": "Bash",
            "toolInput": {"command": "ls"},
            "requestId": "r1"
        }));
        assert_eq!(b.user_id, "12345");
        assert_eq!(b.chat_id, "-100200");
        assert_eq!(b.request_id, "r1");
    }

    #[test]
    fn test_body_accepts_string_ids() {
        let b = body(json!({"userId": "alice", "chatId": "room", "requestId": "r1"}));
        assert_eq!(b.user_id, "alice");
        assert_eq!(b.chat_id, "room");
        assert_eq!(b.tool_input, Value::Null);
    }

    #[test]
    fn test_request_requires_request_id() {
        assert!(PermissionRequest::from_body(body(json!({"toolName": "Bash"}))).is_none());
        assert!(PermissionRequest::from_body(body(json!({"requestId": "  "}))).is_none());
        assert!(PermissionRequest::from_body(body(json!({"requestId": "r1"}))).is_some());
    }

    #[test]
    fn test_shell_input_from_hook_payload() {
        let payload = json!({
            "session_id": "abc",
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": {"command": "cargo test", "description": "Run tests"}
        });
        let input = ToolInput::from_payload("Bash", payload);

        assert_eq!(
            input,
            ToolInput::Shell {
                command: "cargo test".to_string(),
                description: Some("Run tests".to_string()),
            }
        );
        assert_eq!(input.summary().unwrap(), "cargo test (Run tests)");
    }

    #[test]
    fn test_write_input_from_bare_arguments() {
        let input = ToolInput::from_payload(
            "Write",
            json!({"file_path": "/tmp/a.txt", "content": "one\ntwo\n"}),
        );

        assert_eq!(
            input,
            ToolInput::WriteFile {
                file_path: "/tmp/a.txt".to_string(),
                content: "one\ntwo\n".to_string(),
            }
        );
        assert_eq!(input.summary().unwrap(), "/tmp/a.txt (2 lines)");
    }

    #[test]
    fn test_edit_input() {
        let input = ToolInput::from_payload(
            "Edit",
            json!({"tool_input": {"file_path": "src/lib.rs", "old_string": "a", "new_string": "b"}}),
        );
        assert!(matches!(input, ToolInput::EditFile { ref file_path, .. } if file_path == "src/lib.rs"));
    }

    #[test]
    fn test_unknown_tool_passes_through() {
        let input = ToolInput::from_payload("WebFetch", json!({"tool_input": {"url": "https://x"}}));
        assert_eq!(input, ToolInput::Other(json!({"url": "https://x"})));
    }

    #[test]
    fn test_known_tool_with_unexpected_shape_passes_through() {
        let input = ToolInput::from_payload("Bash", json!({"cmd": 1}));
        assert_eq!(input, ToolInput::Other(json!({"cmd": 1})));
    }

    #[test]
    fn test_request_summary() {
        let request = PermissionRequest::from_body(body(json!({
            "requestId": "r1",
            "toolName": "Bash",
            "toolInput": {"tool_input": {"command": "rm -rf target"}}
        })))
        .unwrap();
        assert_eq!(request.summary(), "Bash: rm -rf target");

        let bare = PermissionRequest::from_body(body(json!({"requestId": "r2", "toolName": "Task"})))
            .unwrap();
        assert_eq!(bare.summary(), "Task");
    }

    #[test]
    fn test_other_summary_is_truncated() {
        let long = "x".repeat(500);
        let input = ToolInput::Other(json!({ "data": long }));
        let summary = input.summary().unwrap();
        assert_eq!(summary.chars().count(), 120);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_decision_serialization() {
        let allow = PermissionResponse {
            decision: Decision::from(true),
        };
        assert_eq!(serde_json::to_string(&allow).unwrap(), r#"{"decision":"allow"}"#);
        assert_eq!(Decision::from(false), Decision::Deny);
    }
}
