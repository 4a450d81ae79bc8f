//! Plan commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use stackforge_kernel::client::wait_for_completion;
use stackforge_kernel::domain::{ComponentId, PlanId, TaskState};
use tracing::info;

use crate::cli::Context;
use crate::output::{print_output, print_text};

/// Plan queueing and inspection.
#[derive(Subcommand)]
pub enum PlanCommand {
    /// Queue a plan for a component.
    Create(CreateArgs),
    /// Show one plan.
    Show(TaskArgs),
    /// List plans of a changeset.
    List(ListArgs),
    /// Print the executor output of a plan.
    Logs(TaskArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    /// Changeset name.
    pub changeset: String,
    /// Component id.
    pub component: i64,
    /// Poll until the plan completes or fails.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Args)]
pub struct TaskArgs {
    /// Changeset name.
    pub changeset: String,
    /// Plan id.
    pub id: i64,
}

#[derive(Args)]
pub struct ListArgs {
    /// Changeset name.
    pub changeset: String,
}

impl PlanCommand {
    /// Execute the plan command.
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let client = &ctx.client;
        match self {
            Self::Create(args) => {
                let plan = client
                    .create_plan(&args.changeset, ComponentId::new(args.component))
                    .await?;
                if !args.wait {
                    print_output(&plan, ctx.json);
                    return Ok(());
                }
                info!(plan = %plan.id, "Waiting for plan");
                let plan = wait_for_completion(
                    || client.get_plan(&args.changeset, plan.id),
                    ctx.wait,
                    &ctx.cancel,
                )
                .await?;
                print_output(&plan, ctx.json);
                if plan.state == TaskState::Failed {
                    anyhow::bail!("{} failed; see `stackforge-cli plan logs {} {}`", plan.id, args.changeset, plan.id.get());
                }
            }
            Self::Show(args) => {
                print_output(&client.get_plan(&args.changeset, PlanId::new(args.id)).await?, ctx.json);
            }
            Self::List(args) => print_output(&client.list_plans(&args.changeset).await?, ctx.json),
            Self::Logs(args) => {
                print_text(&client.plan_log(&args.changeset, PlanId::new(args.id)).await?, ctx.json);
            }
        }
        Ok(())
    }
}
