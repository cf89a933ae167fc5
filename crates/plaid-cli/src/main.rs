//! plaid-cli - link bank accounts to Plaid and pull transactions.
//!
//! Linked items, their access tokens and aliases are kept in the data dir
//! (`~/.plaid-cli` unless configured otherwise).

mod cli;
mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{prelude::*, EnvFilter};

use plaid_cli_core::Settings;

use cli::Cli;

/// File name prefix for the rolling log in `cli.log_dir`
const LOG_FILE_PREFIX: &str = "plaid-cli.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Run `f` with a temporary subscriber writing to `writer`.
///
/// Settings decide where the log file goes, so they are loaded before the
/// real subscriber exists; this keeps their log lines visible.
fn with_bootstrap_logging<W, T>(writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(writer)
        .with_env_filter(env_filter())
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`). When a log
/// dir is configured, everything at the same level is also written to a
/// daily-rolling file there; keep the returned guard alive until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = env_filter();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = with_bootstrap_logging(io::stderr, Settings::load)?;
    let _guard = init_tracing(settings.log_dir.as_deref());
    info!(data_dir = %settings.data_dir.display(), "plaid-cli starting");

    commands::dispatch(cli.command, settings).await
}
