//! Agent CLI integration
//!
//! Command building, stream-JSON parsing, process supervision, and the
//! per-user locks that keep runs from overlapping.

pub mod cli;
pub mod runner;
pub mod session;
pub mod stream;
