//! gat - Get Arduino Tools

mod cli;
mod progress;

use anyhow::Result;
use clap::Parser;
use gat_core::{CancellationToken, Settings, ToolGetter};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::cli::{Cli, Command, GetArgs};
use crate::progress::ProgressReporter;

/// Exit status after a second interrupt, as shells report SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Get(args) = cli.command;

    setup_tracing(args.verbose);
    tracing::debug!("Starting gat v{}", gat_core::VERSION);

    match get(args).await {
        Ok(tool_path) => {
            println!("{}", tool_path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!("Failed to get tool: {:?}", err);
            eprintln!("{}", cli::render_error(&err));
            ExitCode::FAILURE
        }
    }
}

fn setup_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("gat=debug,gat_core=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn get(args: GetArgs) -> Result<PathBuf> {
    let settings = Settings::load()?;
    let getter = ToolGetter::new(&settings)?;
    let request = args.to_request(getter.catalog())?;
    tracing::debug!("Getting tool {:?}", request);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if watch_interrupts(tokio::signal::ctrl_c, interrupt).await {
            std::process::exit(EXIT_INTERRUPTED);
        }
    });

    let reporter = ProgressReporter::new(&request.tool, args.silent);
    let result = getter.get_tool(&request, reporter.sink(), &cancel).await;
    reporter.finish(result.is_ok());

    let result = result?;
    tracing::debug!("Tool downloaded to {}", result.tool_path.display());
    Ok(result.tool_path)
}

/// Cancels `cancel` on the first interrupt and returns `true` on the second.
///
/// Returns `false` if the interrupt source fails.
async fn watch_interrupts<F, Fut>(mut interrupted: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if interrupted().await.is_err() {
        return false;
    }
    tracing::debug!("Interrupted, cancelling");
    cancel.cancel();

    if interrupted().await.is_err() {
        return false;
    }
    tracing::warn!("Interrupted again, exiting without waiting for cleanup");
    true
}
