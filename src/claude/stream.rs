//! Stream-JSON parser for Claude Code's `--output-format stream-json` output
//!
//! Parses newline-delimited JSON events from Claude Code into structured
//! `StreamEvent` variants, and folds them into an `ExecutionResult`.

use serde_json::Value;

/// Fields carried by the terminal `result` line of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSummary {
    /// Human-readable result text (empty if the line carried none)
    pub text: String,
    /// Session ID that can be passed back with `--resume`
    pub session_id: Option<String>,
    /// Cost estimate in USD
    pub cost_usd: Option<f64>,
    /// Duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Whether the agent reported the run as failed
    pub is_error: bool,
}

/// A parsed event from Claude Code's stream-json output
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Assistant text output
    TextDelta {
        /// The text content
        text: String,
    },
    /// Tool use request by the assistant
    ToolUse {
        /// Tool name (e.g., "Edit", "Bash")
        tool_name: String,
    },
    /// Tool execution result
    ToolResult {
        /// Tool name, or "tool" when the block does not carry one
        tool_name: String,
    },
    /// Final result of the entire run
    Complete(ResultSummary),
}

/// Parse a single line of stream-json output into a `StreamEvent`.
///
/// Returns `None` for blank lines, lines that are not JSON objects, malformed
/// JSON, and event types other than `assistant` and `result`.
#[must_use]
pub fn parse_event(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }

    let value: Value = serde_json::from_str(line).ok()?;

    match value.get("type")?.as_str()? {
        "assistant" => parse_assistant_event(&value),
        "result" => Some(StreamEvent::Complete(parse_result_event(&value))),
        _ => None,
    }
}

// Only the first meaningful content block of a line becomes an event.
fn parse_assistant_event(value: &Value) -> Option<StreamEvent> {
    let content = value.get("message")?.get("content")?.as_array()?;

    for block in content {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                let text = block.get("text").and_then(Value::as_str).unwrap_or("");
                if !text.is_empty() {
                    return Some(StreamEvent::TextDelta {
                        text: text.to_string(),
                    });
                }
            }
            Some("tool_use") => {
                return Some(StreamEvent::ToolUse {
                    tool_name: block_name(block, "unknown"),
                });
            }
            Some("tool_result") => {
                return Some(StreamEvent::ToolResult {
                    tool_name: block_name(block, "tool"),
                });
            }
            _ => {}
        }
    }

    None
}

fn block_name(block: &Value, fallback: &str) -> String {
    block
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn parse_result_event(value: &Value) -> ResultSummary {
    let text = value
        .get("result")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let session_id = value
        .get("session_id")
        .and_then(Value::as_str)
        .map(String::from);
    let cost_usd = value
        .get("cost_usd")
        .or_else(|| value.get("total_cost_usd"))
        .and_then(Value::as_f64);
    let duration_ms = value.get("duration_ms").and_then(Value::as_u64);
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    ResultSummary {
        text,
        session_id,
        cost_usd,
        duration_ms,
        is_error,
    }
}

/// Aggregated outcome of one agent run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Final text shown to the user; never absent, possibly empty
    pub text: String,
    /// Session ID for resuming the conversation
    pub session_id: Option<String>,
    /// Cost estimate in USD
    pub cost_usd: Option<f64>,
    /// Duration in milliseconds as reported by the agent
    pub duration_ms: Option<u64>,
    /// Whether the run failed
    pub is_error: bool,
    /// Tool names in call order, duplicates preserved
    pub tool_calls: Vec<String>,
}

impl ExecutionResult {
    /// Build an error result carrying only a message
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            ..Self::default()
        }
    }

    /// Tool names de-duplicated in first-use order, for display
    #[must_use]
    pub fn distinct_tools(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.tool_calls
            .iter()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

/// Accumulator for stream events; collects data across events for the final result.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    /// Concatenated text from `TextDelta` events
    pub text: String,
    /// Tool names used during the run
    pub tool_calls: Vec<String>,
    /// Final summary (populated from the `Complete` event)
    pub result: Option<ResultSummary>,
}

impl StreamAccumulator {
    /// Create a new empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a stream event and accumulate relevant data
    pub fn process(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => self.text.push_str(text),
            StreamEvent::ToolUse { tool_name } => self.tool_calls.push(tool_name.clone()),
            StreamEvent::Complete(summary) => self.result = Some(summary.clone()),
            StreamEvent::ToolResult { .. } => {}
        }
    }

    /// Fold the accumulated data into an `ExecutionResult`.
    ///
    /// The `Complete` text wins when non-empty; otherwise the delta buffer is used.
    #[must_use]
    pub fn into_result(self) -> ExecutionResult {
        let summary = self.result.unwrap_or_default();
        let text = if summary.text.is_empty() {
            self.text
        } else {
            summary.text
        };

        ExecutionResult {
            text,
            session_id: summary.session_id,
            cost_usd: summary.cost_usd,
            duration_ms: summary.duration_ms,
            is_error: summary.is_error,
            tool_calls: self.tool_calls,
        }
    }
}
