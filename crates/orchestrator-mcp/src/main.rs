//! Context Orchestrator MCP server.
//!
//! A long-lived local process that accepts conversations from CLI
//! assistants and editor plug-ins, dual-indexes them, and answers hybrid
//! search queries over past experience - JSON-RPC 2.0 over stdio to any
//! MCP client.

mod protocol;
mod server;
mod state;
mod tools;

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use orchestrator_core::{Config, ConsolidationScheduler, Schedule};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;
use crate::state::AppState;

/// Parse command-line arguments; returns the optional data directory.
/// Exits for `--help` and `--version`.
fn parse_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir: Option<PathBuf> = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Context Orchestrator v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Personal external brain over the Model Context Protocol.");
                println!();
                println!("USAGE:");
                println!("    context-orchestrator [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Custom data directory");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                            Log filter (debug, info, ...)");
                println!("    CONTEXT_ORCHESTRATOR_DATA_DIR       Data directory override");
                println!("    CONTEXT_ORCHESTRATOR_LANG_OVERRIDE  Language override");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("context-orchestrator {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--data-dir=") => {
                let path = arg.strip_prefix("--data-dir=").unwrap_or("");
                if path.is_empty() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                data_dir = Some(PathBuf::from(path));
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Try 'context-orchestrator --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    data_dir
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = parse_args();

    let config = Config::load(data_dir).context("loading configuration")?;
    config.ensure_layout().context("creating data directory")?;

    // Logging: stderr (stdout carries JSON-RPC) plus a daily-rotating
    // file under <data_dir>/logs
    let file_appender = tracing_appender::rolling::daily(config.logs_dir(), "orchestrator.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_target(false)
                .with_ansi(false),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "starting context-orchestrator"
    );

    let schedule = Schedule::parse(&config.consolidation.schedule)
        .context("parsing consolidation.schedule")?;
    let consolidation_enabled = config.consolidation.enabled;

    let state = AppState::initialise(config).context("initializing services")?;

    // One owned scheduler task drives the consolidation cron; it also
    // handles the startup catch-up.
    let scheduler = ConsolidationScheduler::new(
        std::sync::Arc::clone(&state.consolidation),
        schedule,
        consolidation_enabled,
    );
    let (scheduler_handle, scheduler_stop) = scheduler.spawn();

    // Serve until stdin closes
    let transport = StdioTransport::new();
    let result = transport.run(McpServer::new(state)).await;

    info!("stdin closed, shutting down");
    let _ = scheduler_stop.send(true);
    let _ = scheduler_handle.await;

    result.context("stdio transport failed")
}
