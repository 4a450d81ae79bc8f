//! Module registry commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use stackforge_kernel::domain::ModuleId;

use crate::cli::Context;
use crate::output::print_output;

/// Module registration.
#[derive(Subcommand)]
pub enum ModuleCommand {
    /// Register a module source.
    Create(CreateArgs),
    /// List registered modules.
    List,
    /// Register a version of a module.
    Version(VersionArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Module name.
    pub name: String,
    /// OpenTofu module source, e.g. a local path or registry address.
    pub source: String,
}

#[derive(Args)]
pub struct VersionArgs {
    /// Module id.
    pub module: i64,
    /// Version string.
    #[arg(value_name = "VERSION")]
    pub module_version: String,
}

impl ModuleCommand {
    /// Execute the module command.
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let client = &ctx.client;
        match self {
            Self::Create(args) => {
                print_output(&client.create_module(&args.name, &args.source).await?, ctx.json);
            }
            Self::List => print_output(&client.list_modules().await?, ctx.json),
            Self::Version(args) => {
                let version = client
                    .create_module_version(ModuleId::new(args.module), &args.module_version)
                    .await?;
                print_output(&version, ctx.json);
            }
        }
        Ok(())
    }
}
