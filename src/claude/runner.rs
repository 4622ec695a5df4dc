//! Agent runner
//!
//! Launches one Claude Code run, streams its stdout through the stream-json
//! parser, forwards events to the caller in read order, and folds them into
//! an `ExecutionResult`. Every failure (bad working directory, spawn error,
//! I/O error, non-zero exit, timeout, cancellation) comes back as an error
//! result rather than an `Err`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cli::build_command;
use super::stream::{parse_event, ExecutionResult, StreamAccumulator, StreamEvent};
use crate::config::{AgentSettings, PermissionMode};

/// Everything needed for one agent run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Prompt text, passed to the agent as one argument
    pub message: String,
    /// Directory the agent runs in; must be absolute and exist
    pub working_dir: PathBuf,
    /// Session ID from a prior run, dropped if malformed
    pub resume_session: Option<String>,
    /// Model override; the configured model is used when `None`
    pub model: Option<String>,
    /// Permission mode exported to the hook
    pub permission_mode: PermissionMode,
    /// Acting user
    pub user_id: String,
    /// Destination chat for permission prompts
    pub chat_id: String,
}

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Request accepted, process not yet spawned
    NotStarted,
    /// Process is running and streaming
    Running,
    /// Process exited and its output was drained
    Completed,
    /// Budget elapsed or caller cancelled; process tree killed
    TimedOut,
    /// Could not start or read the process
    Failed,
}

/// Ways a run can fail. Each renders as the user-facing result text.
#[derive(Debug)]
pub enum RunFailure {
    /// No usable working directory; nothing was spawned
    Configuration(String),
    /// Spawn or stream I/O failed
    Launch(anyhow::Error),
    /// The run budget elapsed
    Timeout(Duration),
    /// The caller cancelled the run
    Cancelled,
    /// The process exited unsuccessfully without producing text
    NonZeroExit {
        /// Exit code, `None` if killed by a signal
        code: Option<i32>,
        /// Captured stderr
        stderr: String,
    },
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "no working directory: {msg}"),
            Self::Launch(err) => write!(f, "agent failed: {err:#}"),
            Self::Timeout(budget) if budget.as_secs() == 0 => {
                write!(f, "agent timed out after {}ms", budget.as_millis())
            }
            Self::Timeout(budget) => write!(f, "agent timed out after {}s", budget.as_secs()),
            Self::Cancelled => f.write_str("agent run cancelled"),
            Self::NonZeroExit { code, stderr } => {
                let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
                write!(f, "agent exited with code {code}:\n{}", stderr.trim_end())
            }
        }
    }
}

impl From<RunFailure> for ExecutionResult {
    fn from(failure: RunFailure) -> Self {
        Self::error(failure.to_string())
    }
}

/// Output of a run that reached process exit
struct Drained {
    accumulator: StreamAccumulator,
    status: ExitStatus,
    stderr: String,
}

/// Runs Claude Code for execution requests
#[derive(Debug, Clone)]
pub struct AgentRunner {
    settings: AgentSettings,
    broker_port: u16,
    timeout: Duration,
}

impl AgentRunner {
    /// Create a runner that points the hook at the broker on `broker_port`
    #[must_use]
    pub fn new(settings: AgentSettings, broker_port: u16) -> Self {
        let timeout = settings.max_timeout();
        Self {
            settings,
            broker_port,
            timeout,
        }
    }

    /// Override the run budget from the settings
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute a run with no external cancellation.
    ///
    /// See [`AgentRunner::execute_with_cancel`].
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        events: Option<mpsc::Sender<StreamEvent>>,
    ) -> ExecutionResult {
        self.execute_with_cancel(request, events, CancellationToken::new())
            .await
    }

    /// Execute a run, streaming parsed events into `events`.
    ///
    /// Events are sent in the order their lines were read. A dropped receiver
    /// does not stop the run. When the budget elapses or `cancel` fires, the
    /// whole process group is killed and no further events are sent.
    pub async fn execute_with_cancel(
        &self,
        request: &ExecutionRequest,
        events: Option<mpsc::Sender<StreamEvent>>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let mut state = RunState::NotStarted;

        if let Err(failure) = check_working_dir(&request.working_dir) {
            warn!(user_id = %request.user_id, %failure, "rejecting run before spawn");
            return failure.into();
        }

        let mut cmd = build_command(&self.settings, request, self.broker_port);
        cmd.current_dir(&request.working_dir);
        info!(
            binary = %self.settings.binary,
            args = cmd.get_args().len(),
            user_id = %request.user_id,
            "starting agent"
        );

        let mut child = match spawn(cmd) {
            Ok(child) => child,
            Err(err) => {
                state = transition(state, RunState::Failed);
                error!(?state, "failed to spawn agent: {err:#}");
                return RunFailure::Launch(err).into();
            }
        };
        state = transition(state, RunState::Running);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RunFailure::Cancelled),
            () = tokio::time::sleep(self.timeout) => Err(RunFailure::Timeout(self.timeout)),
            drained = drain(&mut child, events) => drained.map_err(RunFailure::Launch),
        };

        match outcome {
            Ok(drained) => {
                transition(state, RunState::Completed);
                finish(drained)
            }
            Err(failure @ (RunFailure::Timeout(_) | RunFailure::Cancelled)) => {
                transition(state, RunState::TimedOut);
                kill_tree(&mut child).await;
                warn!(user_id = %request.user_id, %failure, "agent run stopped");
                failure.into()
            }
            Err(failure) => {
                transition(state, RunState::Failed);
                kill_tree(&mut child).await;
                error!(user_id = %request.user_id, %failure, "agent run failed");
                failure.into()
            }
        }
    }
}

fn transition(from: RunState, to: RunState) -> RunState {
    debug!(?from, ?to, "run state");
    to
}

fn check_working_dir(dir: &Path) -> std::result::Result<(), RunFailure> {
    if dir.as_os_str().is_empty() {
        return Err(RunFailure::Configuration("not set".to_string()));
    }
    if !dir.is_absolute() {
        return Err(RunFailure::Configuration(format!(
            "{} is not an absolute path",
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(RunFailure::Configuration(format!(
            "{} does not exist",
            dir.display()
        )));
    }
    Ok(())
}

fn spawn(mut cmd: std::process::Command) -> Result<Child> {
    // Own process group, so a timeout can kill every descendant at once.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut cmd = TokioCommand::from(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn().context("Failed to spawn agent process")
}

/// Read stdout line by line while stderr is collected on a separate task.
async fn drain(child: &mut Child, events: Option<mpsc::Sender<StreamEvent>>) -> Result<Drained> {
    let child_stdout = child.stdout.take().context("Failed to capture stdout")?;
    let mut child_stderr = child.stderr.take().context("Failed to capture stderr")?;

    let stderr_handle = tokio::spawn(async move {
        let mut captured = String::new();
        if let Err(err) = child_stderr.read_to_string(&mut captured).await {
            debug!(%err, "stderr read ended early");
        }
        captured
    });

    let mut lines = BufReader::new(child_stdout).lines();
    let mut accumulator = StreamAccumulator::new();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read agent output")?
    {
        let Some(event) = parse_event(&line) else {
            continue;
        };
        accumulator.process(&event);

        if let Some(tx) = &events {
            if tx.send(event).await.is_err() {
                debug!("event receiver dropped, continuing to drain");
            }
        }
    }

    let status = child.wait().await.context("Failed waiting for agent")?;
    let stderr = stderr_handle.await.unwrap_or_default();

    Ok(Drained {
        accumulator,
        status,
        stderr,
    })
}

fn finish(drained: Drained) -> ExecutionResult {
    let Drained {
        accumulator,
        status,
        stderr,
    } = drained;

    if !stderr.trim().is_empty() {
        warn!(stderr = %stderr.trim_end(), "agent wrote to stderr");
    }

    let mut result = accumulator.into_result();

    if !status.success() && result.text.is_empty() {
        result.text = RunFailure::NonZeroExit {
            code: status.code(),
            stderr,
        }
        .to_string();
        result.is_error = true;
    }

    info!(
        exit_code = ?status.code(),
        text_len = result.text.len(),
        tools = result.tool_calls.len(),
        is_error = result.is_error,
        "agent finished"
    );

    result
}

/// Kill the agent and all of its descendants, then reap the direct child.
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!(pid, %err, "killpg failed");
            }
        }
    }

    if let Err(err) = child.kill().await {
        debug!(%err, "agent already exited");
    }
}
