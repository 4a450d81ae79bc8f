//! CLI argument parsing and command dispatch.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::Url;
use stackforge_kernel::client::{ApiClient, WaitOptions};
use tokio_util::sync::CancellationToken;

use crate::commands::apply::ApplyCommand;
use crate::commands::changeset::ChangesetCommand;
use crate::commands::component::ComponentCommand;
use crate::commands::module::ModuleCommand;
use crate::commands::plan::PlanCommand;

/// Command-line client for the stackforge control plane.
#[derive(Parser)]
#[command(name = "stackforge-cli")]
#[command(version)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Clone)]
pub struct GlobalOptions {
    /// Control-plane base URL.
    #[arg(
        long,
        env = "STACKFORGE_SERVER",
        default_value = "http://127.0.0.1:9090/",
        global = true
    )]
    pub server: String,

    /// Seconds to wait for a task with `--wait`. Waits forever when unset.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Output JSON instead of a one-line summary.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Top-level command groups.
#[derive(Subcommand)]
pub enum Commands {
    /// Create, inspect, merge and rebase changesets.
    #[command(subcommand)]
    Changeset(ChangesetCommand),

    /// Manage components on a changeset or inspect trunk.
    #[command(subcommand)]
    Component(ComponentCommand),

    /// Queue and inspect plans.
    #[command(subcommand)]
    Plan(PlanCommand),

    /// Queue and inspect applies.
    #[command(subcommand)]
    Apply(ApplyCommand),

    /// Register modules and versions.
    #[command(subcommand)]
    Module(ModuleCommand),
}

/// Everything a command needs to talk to the server.
pub struct Context {
    pub client: ApiClient,
    pub json: bool,
    pub wait: WaitOptions,
    pub cancel: CancellationToken,
}

impl Cli {
    /// Builds the client and runs the selected command.
    pub async fn run(self) -> Result<()> {
        let base = Url::parse(&self.global.server)
            .with_context(|| format!("invalid server URL {}", self.global.server))?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let ctx = Context {
            client: ApiClient::new(base),
            json: self.global.json,
            wait: WaitOptions {
                timeout: self.global.timeout.map(Duration::from_secs),
                ..WaitOptions::default()
            },
            cancel,
        };

        match self.command {
            Commands::Changeset(cmd) => cmd.run(&ctx).await,
            Commands::Component(cmd) => cmd.run(&ctx).await,
            Commands::Plan(cmd) => cmd.run(&ctx).await,
            Commands::Apply(cmd) => cmd.run(&ctx).await,
            Commands::Module(cmd) => cmd.run(&ctx).await,
        }
    }
}
