use std::sync::Arc;

use async_trait::async_trait;

use super::WorkSource;
use crate::domain::{ApplyId, CoreError, PlanId, TaskState};
use crate::pipeline::{Pipeline, QueuedTask};

/// Queued plans across every owning branch.
#[derive(Clone)]
pub struct PlanSource(pub Arc<Pipeline>);

#[async_trait]
impl WorkSource for PlanSource {
    type Item = QueuedTask<PlanId>;

    fn kind(&self) -> &'static str {
        "plan"
    }

    async fn queued(&self) -> Result<Vec<Self::Item>, CoreError> {
        self.0.queued_plans().await
    }

    async fn execute(&self, item: Self::Item) -> Result<TaskState, CoreError> {
        self.0.run_plan(item.id, &item.branch).await
    }

    async fn abandon(&self, item: Self::Item, reason: &str) -> Result<(), CoreError> {
        self.0.abandon_plan(item.id, &item.branch, reason).await?;
        Ok(())
    }
}

/// Queued applies across every owning branch.
#[derive(Clone)]
pub struct ApplySource(pub Arc<Pipeline>);

#[async_trait]
impl WorkSource for ApplySource {
    type Item = QueuedTask<ApplyId>;

    fn kind(&self) -> &'static str {
        "apply"
    }

    async fn queued(&self) -> Result<Vec<Self::Item>, CoreError> {
        self.0.queued_applies().await
    }

    async fn execute(&self, item: Self::Item) -> Result<TaskState, CoreError> {
        self.0.run_apply(item.id, &item.branch).await
    }

    async fn abandon(&self, item: Self::Item, reason: &str) -> Result<(), CoreError> {
        self.0.abandon_apply(item.id, &item.branch, reason).await?;
        Ok(())
    }
}
