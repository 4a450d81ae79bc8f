//! Apply commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use stackforge_kernel::client::wait_for_completion;
use stackforge_kernel::domain::{ApplyId, PlanId, TaskState};
use tracing::info;

use crate::cli::Context;
use crate::output::{print_output, print_text};

/// Apply queueing and inspection.
#[derive(Subcommand)]
pub enum ApplyCommand {
    /// Queue an apply of a completed plan.
    Create(CreateArgs),
    /// Show one apply.
    Show(TaskArgs),
    /// List applies of a changeset.
    List(ListArgs),
    /// Print the executor output of an apply.
    Logs(TaskArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Changeset name.
    pub changeset: String,
    /// Plan id.
    pub plan: i64,
    /// Poll until the apply completes or fails.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args)]
pub struct TaskArgs {
    /// Changeset name.
    pub changeset: String,
    /// Apply id.
    pub id: i64,
}

#[derive(Args)]
pub struct ListArgs {
    /// Changeset name.
    pub changeset: String,
}

impl ApplyCommand {
    /// Execute the apply command.
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let client = &ctx.client;
        match self {
            Self::Create(args) => {
                let apply = client
                    .create_apply(&args.changeset, PlanId::new(args.plan))
                    .await?;
                if !args.wait {
                    print_output(&apply, ctx.json);
                    return Ok(());
                }
                info!(apply = %apply.id, "Waiting for apply");
                let apply = wait_for_completion(
                    || client.get_apply(&args.changeset, apply.id),
                    ctx.wait,
                    &ctx.cancel,
                )
                .await?;
                print_output(&apply, ctx.json);
                if apply.state == TaskState::Failed {
                    anyhow::bail!("{} failed; see `stackforge-cli apply logs {} {}`", apply.id, args.changeset, apply.id.get());
                }
            }
            Self::Show(args) => {
                print_output(&client.get_apply(&args.changeset, ApplyId::new(args.id)).await?, ctx.json);
            }
            Self::List(args) => print_output(&client.list_applies(&args.changeset).await?, ctx.json),
            Self::Logs(args) => {
                print_text(&client.apply_log(&args.changeset, ApplyId::new(args.id)).await?, ctx.json);
            }
        }
        Ok(())
    }
}
