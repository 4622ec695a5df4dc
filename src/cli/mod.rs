//! Terminal front end
//!
//! Live rendering of agent runs and interactive permission prompts.

pub mod display;
pub mod prompt;

pub use display::{format_footer, RunDisplay};
pub use prompt::ConsoleNotifier;
