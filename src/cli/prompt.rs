//! Terminal permission prompts
//!
//! Asks the person at the terminal to allow or deny each tool call. Prompts
//! are serialised so concurrent requests never interleave on screen.

use std::future::Future;
use std::io::{self, BufRead, Write};
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::display::print_permission_request;
use crate::permission::{PermissionBroker, PermissionNotifier, PermissionRequest};

/// Notifier that prompts `[y/N]` on the controlling terminal.
///
/// `notify` returns immediately; the prompt runs on its own task and calls
/// [`PermissionBroker::resolve`] with the answer. Anything other than `y` or
/// `yes` is a deny.
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier {
    turn: Arc<Mutex<()>>,
}

impl ConsoleNotifier {
    /// Create a notifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionNotifier for ConsoleNotifier {
    fn notify(
        &self,
        request: PermissionRequest,
        broker: PermissionBroker,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let turn = Arc::clone(&self.turn);
        Box::pin(async move {
            tokio::spawn(async move {
                let _turn = turn.lock().await;
                print_permission_request(&request);

                let allowed = match tokio::task::spawn_blocking(read_answer).await {
                    Ok(Ok(allowed)) => allowed,
                    Ok(Err(err)) => {
                        tracing::warn!(%err, "could not read permission answer");
                        false
                    }
                    Err(err) => {
                        tracing::warn!(%err, "permission prompt task failed");
                        false
                    }
                };

                if !broker.resolve(&request.request_id, allowed) {
                    eprintln!("  (request already decided, answer ignored)");
                }
            });
            Ok(())
        })
    }
}

fn read_answer() -> io::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "  Allow? [y/N] ")?;
    stderr.flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(parse_answer(&line))
}

/// Interpret a typed answer; only `y` and `yes` allow
#[must_use]
pub fn parse_answer(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
