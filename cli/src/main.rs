//! Stackforge CLI - command-line client for the control plane.
//!
//! Issues the same requests as the REST API. Task-creating commands accept
//! `--wait` to poll until the task finishes.
//!
//! # Usage
//!
//! ```bash
//! stackforge-cli changeset create feat-1
//! stackforge-cli component create feat-1 --name vpc --module-version 1 --var cidr='"10.0.0.0/16"'
//! stackforge-cli plan create feat-1 3 --wait
//! stackforge-cli apply create feat-1 7 --wait
//! stackforge-cli changeset merge feat-1
//! ```

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Initialize tracing subscriber with environment-based filtering.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);
    cli.run().await
}
