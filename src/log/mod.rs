//! Run history
//!
//! Append-only JSONL record of finished agent runs, used to resume the
//! last session for a user.

pub mod jsonl;

pub use jsonl::{JsonlLogger, RunRecord};
