//! Terminal display for agent runs
//!
//! Renders stream events as they arrive and a footer when the run ends.
//! All output goes to stderr so stdout carries only the final answer.

use colored::Colorize;

use crate::claude::stream::{ExecutionResult, StreamEvent};
use crate::permission::PermissionRequest;

/// Display handler for one run
pub struct RunDisplay {
    user_id: String,
}

impl RunDisplay {
    /// Create a display for a run on behalf of `user_id`
    #[must_use]
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
        }
    }

    /// Print the run header
    pub fn print_header(&self, model: &str, resume: Option<&str>) {
        eprintln!(
            "\n{} {}",
            "===".bold().cyan(),
            format!("Run for {}", self.user_id).bold().cyan()
        );
        eprintln!("  {} {model}", "Model:".dimmed());
        if let Some(session) = resume {
            eprintln!("  {} {session}", "Resuming:".dimmed());
        }
        eprintln!("{}", "─".repeat(50).dimmed());
    }

    /// Render a stream event to stderr
    pub fn render_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta { text } => {
                eprintln!("  {}", truncate(text.trim_end(), 200));
            }
            StreamEvent::ToolUse { tool_name } => {
                eprintln!("  {} {}", "▶".blue(), tool_name.bold());
            }
            StreamEvent::ToolResult { .. } => {}
            StreamEvent::Complete(summary) => {
                let status = if summary.is_error {
                    "FAILED".red().bold()
                } else {
                    "COMPLETED".green().bold()
                };
                eprintln!("{}", "─".repeat(50).dimmed());
                eprintln!("  {status}");
            }
        }
    }

    /// Print the footer line for a finished run
    pub fn print_footer(&self, result: &ExecutionResult) {
        let footer = format_footer(result);
        if !footer.is_empty() {
            eprintln!("  {}", footer.dimmed());
        }
        if let Some(session) = &result.session_id {
            eprintln!("  {} {session}", "Session:".dimmed());
        }
        eprintln!();
    }
}

/// Show a pending permission request
pub fn print_permission_request(request: &PermissionRequest) {
    eprintln!(
        "\n  {} {}",
        "⚠ Permission requested:".yellow().bold(),
        request.summary().bold()
    );
}

/// Cost, duration and tools joined with ` | `; parts without data are left out.
#[must_use]
pub fn format_footer(result: &ExecutionResult) -> String {
    let mut parts = Vec::new();

    if let Some(cost) = result.cost_usd {
        parts.push(format!("${cost:.4}"));
    }
    if let Some(ms) = result.duration_ms {
        #[allow(clippy::cast_precision_loss)]
        let secs = ms as f64 / 1000.0;
        parts.push(format!("{secs:.1}s"));
    }
    let tools = result.distinct_tools();
    if !tools.is_empty() {
        parts.push(tools.join(", "));
    }

    parts.join(" | ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude::stream::ResultSummary;

    #[test]
    fn test_footer_with_all_parts() {
        let result = ExecutionResult {
            text: "done".to_string(),
            cost_usd: Some(0.0123),
            duration_ms: Some(4200),
            tool_calls: vec!["Read".to_string(), "Bash".to_string(), "Read".to_string()],
            ..ExecutionResult::default()
        };
        assert_eq!(format_footer(&result), "$0.0123 | 4.2s | Read, Bash");
    }

    #[test]
    fn test_footer_skips_missing_parts() {
        let result = ExecutionResult {
            duration_ms: Some(500),
            ..ExecutionResult::default()
        };
        assert_eq!(format_footer(&result), "0.5s");
        assert_eq!(format_footer(&ExecutionResult::default()), "");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("héllo", 10), "héllo");
        let long = "é".repeat(50);
        let short = truncate(&long, 10);
        assert_eq!(short.chars().count(), 10);
        assert!(short.ends_with("..."));
    }

    // render_event must not panic for any event type
    #[test]
    fn test_render_all_event_types_no_panic() {
        let display = RunDisplay::new("u1");
        display.print_header("sonnet", Some("s1"));

        display.render_event(&StreamEvent::TextDelta {
            text: "x".repeat(500),
        });
        display.render_event(&StreamEvent::ToolUse {
            tool_name: "Bash".to_string(),
        });
        display.render_event(&StreamEvent::ToolResult {
            tool_name: "tool".to_string(),
        });
        display.render_event(&StreamEvent::Complete(ResultSummary {
            text: "Done".to_string(),
            session_id: Some("s1".to_string()),
            cost_usd: Some(0.5),
            duration_ms: Some(1000),
            is_error: true,
        }));

        display.print_footer(&ExecutionResult::error("boom"));
    }
}
