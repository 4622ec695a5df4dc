//! JSONL (JSON Lines) run history
//!
//! Provides append-only logging of agent runs to `.tether/runs.jsonl`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use crate::claude::cli::is_valid_session_id;
use crate::claude::stream::ExecutionResult;

const EXCERPT_CHARS: usize = 200;

/// One finished agent run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Acting user
    pub user_id: String,
    /// Destination chat
    pub chat_id: String,
    /// Session the agent reported, if any
    pub session_id: Option<String>,
    /// Start of the final text
    pub outcome: String,
    /// Whether the run ended in error
    pub is_error: bool,
    /// Reported cost in USD
    pub total_cost_usd: Option<f64>,
    /// Reported duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Distinct tools used, in first-use order
    pub tools: Vec<String>,
}

impl RunRecord {
    /// Summarise an execution result for the log
    #[must_use]
    pub fn from_result(user_id: &str, chat_id: &str, result: &ExecutionResult) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            session_id: result.session_id.clone(),
            outcome: excerpt(&result.text),
            is_error: result.is_error,
            total_cost_usd: result.cost_usd,
            duration_ms: result.duration_ms,
            tools: result
                .distinct_tools()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{head}…")
}

/// JSONL logger for run history
///
/// Each line is a JSON object representing a single run.
pub struct JsonlLogger {
    log_path: PathBuf,
}

impl JsonlLogger {
    /// Create a logger writing `runs.jsonl` inside `log_dir`
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        Ok(Self {
            log_path: log_dir.join("runs.jsonl"),
        })
    }

    /// Append a run to the log
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or written
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        let json = serde_json::to_string(record).context("Failed to serialize run record")?;
        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all runs, oldest first
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is not a valid record
    pub fn read_all(&self) -> Result<Vec<RunRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        let mut records = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: RunRecord = serde_json::from_str(line)
                .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))?;
            records.push(record);
        }

        Ok(records)
    }

    /// Most recent resumable session for `user_id`.
    ///
    /// Skips runs without a session id or with one the agent would reject.
    pub fn last_session_for(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .find_map(|record| record.session_id.filter(|id| is_valid_session_id(id))))
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(user: &str, session: Option<&str>) -> RunRecord {
        RunRecord {
            timestamp: Utc::now(),
            user_id: user.to_string(),
            chat_id: "c1".to_string(),
            session_id: session.map(str::to_string),
            outcome: "done".to_string(),
            is_error: false,
            total_cost_usd: Some(0.01),
            duration_ms: Some(1500),
            tools: vec!["Bash".to_string()],
        }
    }

    #[test]
    fn test_new_logger_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join(".tether");

        let logger = JsonlLogger::new(&log_dir).unwrap();

        assert!(log_dir.exists());
        assert_eq!(logger.log_path(), log_dir.join("runs.jsonl"));
    }

    #[test]
    fn test_append_writes_one_line_per_run() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();

        logger.append(&record("u1", Some("s1"))).unwrap();
        logger.append(&record("u1", Some("s2"))).unwrap();

        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_read_all_empty_log() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();

        assert!(logger.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_read_all_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();

        logger.append(&record("alice", Some("s1"))).unwrap();
        logger.append(&record("bob", None)).unwrap();

        let records = logger.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, "alice");
        assert_eq!(records[1].session_id, None);
    }

    #[test]
    fn test_read_all_reports_bad_line() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();
        logger.append(&record("u1", Some("s1"))).unwrap();
        fs::write(
            logger.log_path(),
            fs::read_to_string(logger.log_path()).unwrap() + "garbage\n",
        )
        .unwrap();

        let err = logger.read_all().unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_last_session_for_user() {
        let temp_dir = TempDir::new().unwrap();
        let logger = JsonlLogger::new(temp_dir.path()).unwrap();

        logger.append(&record("alice", Some("s-old"))).unwrap();
        logger.append(&record("bob", Some("s-bob"))).unwrap();
        logger.append(&record("alice", Some("s-new"))).unwrap();
        logger.append(&record("alice", None)).unwrap();
        logger.append(&record("alice", Some("bad id;"))).unwrap();

        assert_eq!(logger.last_session_for("alice").unwrap().as_deref(), Some("s-new"));
        assert_eq!(logger.last_session_for("bob").unwrap().as_deref(), Some("s-bob"));
        assert_eq!(logger.last_session_for("carol").unwrap(), None);
    }

    #[test]
    fn test_record_from_result() {
        let result = ExecutionResult {
            text: format!("  {}  ", "x".repeat(300)),
            session_id: Some("s1".to_string()),
            cost_usd: Some(0.25),
            duration_ms: Some(2000),
            is_error: false,
            tool_calls: vec!["Read".to_string(), "Bash".to_string(), "Read".to_string()],
        };

        let record = RunRecord::from_result("u1", "c1", &result);

        assert_eq!(record.outcome.chars().count(), EXCERPT_CHARS + 1);
        assert!(record.outcome.ends_with('…'));
        assert_eq!(record.tools, vec!["Read", "Bash"]);
        assert_eq!(record.session_id.as_deref(), Some("s1"));
        assert_eq!(record.total_cost_usd, Some(0.25));
    }
}
