//! Changeset commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use stackforge_kernel::domain::{ChangesetState, ReviewState};

use crate::cli::Context;
use crate::output::print_output;

/// Changeset lifecycle, review, merge and rebase.
#[derive(Subcommand)]
pub enum ChangesetCommand {
    /// Open a changeset on a fresh branch of trunk.
    Create(NameArgs),
    /// List changesets.
    List(ListArgs),
    /// Show one changeset.
    Show(NameArgs),
    /// Record a review decision.
    Review(ReviewArgs),
    /// Abandon a changeset and delete its branch.
    Close(NameArgs),
    /// Rows changed on the branch since it forked from trunk.
    Diff(NameArgs),
    /// Commits on the branch, newest first.
    History(HistoryArgs),
    /// Merge into trunk.
    Merge(NameArgs),
    /// Replay the branch onto current trunk.
    Rebase(NameArgs),
    /// List merge attempts.
    Merges(NameArgs),
    /// List rebase attempts.
    Rebases(NameArgs),
}

#[derive(Args)]
pub struct NameArgs {
    /// Changeset name.
    pub name: String,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only list changesets in this state.
    #[arg(long)]
    pub state: Option<ChangesetState>,
}

#[derive(Args)]
pub struct ReviewArgs {
    /// Changeset name.
    pub name: String,
    /// unreviewed, approved or changes_requested.
    pub review_state: ReviewState,
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Changeset name.
    pub name: String,
    /// Maximum number of commits.
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

impl ChangesetCommand {
    /// Execute the changeset command.
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let client = &ctx.client;
        match self {
            Self::Create(args) => print_output(&client.create_changeset(&args.name).await?, ctx.json),
            Self::List(args) => print_output(&client.list_changesets(args.state).await?, ctx.json),
            Self::Show(args) => print_output(&client.get_changeset(&args.name).await?, ctx.json),
            Self::Review(args) => print_output(
                &client.review_changeset(&args.name, args.review_state).await?,
                ctx.json,
            ),
            Self::Close(args) => print_output(&client.close_changeset(&args.name).await?, ctx.json),
            Self::Diff(args) => print_output(&client.changeset_diff(&args.name).await?, ctx.json),
            Self::History(args) => print_output(
                &client.changeset_history(&args.name, args.limit).await?,
                ctx.json,
            ),
            Self::Merge(args) => print_output(&client.merge(&args.name).await?, ctx.json),
            Self::Rebase(args) => print_output(&client.rebase(&args.name).await?, ctx.json),
            Self::Merges(args) => print_output(&client.list_merges(&args.name).await?, ctx.json),
            Self::Rebases(args) => print_output(&client.list_rebases(&args.name).await?, ctx.json),
        }
        Ok(())
    }
}
