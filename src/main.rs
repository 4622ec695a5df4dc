//! tether - run a coding agent with human-approved tool calls
//!
//! CLI entry point.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tether::claude::cli::validate_model;
use tether::claude::runner::{AgentRunner, ExecutionRequest};
use tether::claude::session::SessionLocks;
use tether::cli::{ConsoleNotifier, RunDisplay};
use tether::config::TetherConfig;
use tether::log::{JsonlLogger, RunRecord};
use tether::permission::{HookInstaller, PermissionBroker};

/// Buffered stream events between the runner and the display
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Run a coding agent CLI with a human in the loop for tool permissions
#[derive(Parser, Debug)]
#[command(name = "tether", version, about)]
struct Cli {
    /// Path to the tether.toml configuration file
    #[arg(long, global = true, default_value = "tether.toml")]
    config: PathBuf,

    /// Directory for the run log (.tether by default)
    #[arg(long, global = true, default_value = ".tether")]
    log_dir: PathBuf,

    /// Diagnostic log format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message to the agent and stream the reply
    Run(RunArgs),
    /// Install the permission hook into the agent's settings
    InstallHook,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Working directory for the agent (defaults to the current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Model override
    #[arg(long)]
    model: Option<String>,

    /// Resume this session ID
    #[arg(long, conflicts_with = "continue_session")]
    resume: Option<String>,

    /// Resume the last recorded session for this user
    #[arg(long = "continue")]
    continue_session: bool,

    /// Acting user ID
    #[arg(long, default_value = "local")]
    user: String,

    /// Chat ID reported to the permission hook
    #[arg(long, default_value = "local")]
    chat: String,

    /// Message to send to the agent
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = TetherConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Command::InstallHook => install_hook(&config),
        Command::Run(args) => {
            let code = run(&config, &cli.log_dir, args).await?;
            // A prompt may still be blocked on stdin; do not wait for it.
            std::process::exit(code);
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| anyhow::anyhow!("Failed to init tracing: {err}"))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| anyhow::anyhow!("Failed to init tracing: {err}"))?,
    }

    Ok(())
}

fn install_hook(config: &TetherConfig) -> Result<()> {
    let installation = HookInstaller::from_home()?
        .with_permission_timeout(config.permission.timeout())
        .install()
        .context("Failed to install permission hook")?;

    eprintln!("Hook script: {}", installation.script_path.display());
    if installation.replaced_existing {
        eprintln!("Updated existing entry in {}", installation.settings_path.display());
    } else {
        eprintln!("Registered in {}", installation.settings_path.display());
    }
    Ok(())
}

/// Execute one run and return the process exit code.
async fn run(config: &TetherConfig, log_dir: &Path, args: RunArgs) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let working_dir = args.cwd.map_or_else(|| cwd.clone(), |dir| cwd.join(dir));

    let logger = JsonlLogger::new(log_dir)?;
    let resume_session = if args.continue_session {
        let last = logger.last_session_for(&args.user)?;
        if last.is_none() {
            eprintln!("No previous session for {}, starting a new one", args.user);
        }
        last
    } else {
        args.resume
    };

    let locks = SessionLocks::new();
    let Some(guard) = locks.try_acquire(&args.user) else {
        bail!("A run for {} is already in progress", args.user);
    };

    let broker = PermissionBroker::start(
        Arc::new(ConsoleNotifier::new()),
        config.permission.timeout(),
    )
    .await?;

    let model = validate_model(args.model.as_deref().unwrap_or(&config.agent.model)).to_string();
    let request = ExecutionRequest {
        message: args.message,
        working_dir,
        resume_session,
        model: Some(model.clone()),
        permission_mode: config.agent.permission_mode,
        user_id: args.user,
        chat_id: args.chat,
    };

    let display = RunDisplay::new(&request.user_id);
    display.print_header(&model, request.resume_session.as_deref());

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let renderer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            display.render_event(&event);
        }
        display
    });

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling run...");
                cancel.cancel();
            }
        });
    }

    info!(user_id = %request.user_id, port = broker.port(), "starting agent run");
    let runner = AgentRunner::new(config.agent.clone(), broker.port());
    let result = runner.execute_with_cancel(&request, Some(tx), cancel).await;
    broker.shutdown();
    guard.release();

    let display = renderer.await.context("Display task failed")?;
    display.print_footer(&result);
    if !result.text.is_empty() {
        println!("{}", result.text);
    }

    logger
        .append(&RunRecord::from_result(&request.user_id, &request.chat_id, &result))
        .context("Failed to write to JSONL log")?;

    Ok(i32::from(result.is_error))
}
