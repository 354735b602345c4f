//! CLI entrypoint and subcommand orchestration.

mod config;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use proto::{ArgMap, ToolCall};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use agent::BrokerContext;
use config::Config;
use transport::{ProcessLauncher, WorkerClient, WorkerRpc};

/// Top-level command-line arguments for the tool broker.
#[derive(Parser)]
#[command(name = "tool-broker")]
#[command(about = "Tool-calling broker for a Studio worker process", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug logging to ~/.tool-broker/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker, complete the handshake, and report its state
    Check,

    /// Run one tool call through the full pipeline
    Call {
        /// Tool name as a model would send it
        name: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Call id; generated when omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Print the tool declarations handed to the model
    Tools,

    /// Print the table literal for an argument object
    Literal {
        /// Arguments as a JSON object
        #[arg(short, long)]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // Must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    if cli.debug {
        let log_dir = config::log_dir();
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);

        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter);
        let file = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(EnvFilter::new("debug"));
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .init();
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command_label(&cli.command),
            log_level = %cli.log_level,
            "========== tool-broker session start =========="
        );
    } else {
        _file_guard = None;
        fmt()
            .with_env_filter(console_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Tools => cmd_tools(),
        Commands::Literal { args } => cmd_literal(&args),
        command => {
            let config = Config::load(cli.config.as_deref()).context("failed to load config")?;
            match command {
                Commands::Check => cmd_check(&config).await,
                Commands::Call { name, args, id } => cmd_call(&config, name, &args, id).await,
                Commands::Tools | Commands::Literal { .. } => Ok(()),
            }
        }
    }
}

fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Check => "check",
        Commands::Call { .. } => "call",
        Commands::Tools => "tools",
        Commands::Literal { .. } => "literal",
    }
}

/// Parses `--args` into an argument map.
fn parse_args(raw: &str) -> anyhow::Result<ArgMap> {
    match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--args must be a JSON object, got {other}"),
    }
}

fn cmd_tools() -> anyhow::Result<()> {
    let definitions = tools::definitions();
    println!("{}", serde_json::to_string_pretty(&definitions)?);
    Ok(())
}

fn cmd_literal(raw: &str) -> anyhow::Result<()> {
    let args = parse_args(raw)?;
    println!("{}", tools::to_table_literal(&Value::Object(args)));
    Ok(())
}

/// Launches the configured worker and returns the connected client.
async fn connect(config: &Config) -> anyhow::Result<Arc<WorkerClient>> {
    let launcher = Arc::new(ProcessLauncher::new(
        &config.worker.path,
        config.worker.args.clone(),
    ));
    info!(
        program = %launcher.program().display(),
        args = ?config.worker.args,
        "Connecting to worker"
    );
    let client = Arc::new(WorkerClient::new(launcher, config.transport_settings()));
    client
        .start(config.worker.start_attempts)
        .await
        .with_context(|| format!("failed to start worker '{}'", config.worker.path))?;
    Ok(client)
}

async fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let client = connect(config).await?;
    let state = client.state();
    println!("worker '{}' is {state:?}", config.worker.path);
    client.stop().await;
    Ok(())
}

async fn cmd_call(
    config: &Config,
    name: String,
    raw_args: &str,
    id: Option<String>,
) -> anyhow::Result<()> {
    let args = parse_args(raw_args)?;
    let call = ToolCall::with_id(id, name, args);

    let client = connect(config).await?;
    let worker: Arc<dyn WorkerRpc> = client.clone();
    let context = BrokerContext::new(worker, config.broker_settings());

    let result = context.pipeline().execute(&call).await;
    if result.is_error() {
        warn!(tool = %result.name, status = result.status().as_str(), "Tool call did not succeed");
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !client.is_alive() {
        error!("Worker connection was lost during the call");
    }
    client.stop().await;
    Ok(())
}
