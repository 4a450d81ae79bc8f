//! Background workers.
//!
//! Each worker type runs one polling loop that scans for queued work on an
//! interval or when woken, and executes items one at a time. Every item
//! runs in its own task so a panic is contained to that item.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{CoreError, TaskState};

mod sources;

pub use sources::{ApplySource, PlanSource};

/// Non-blocking nudge telling a worker that new work was queued.
#[derive(Debug, Clone, Default)]
pub struct WakeSignal {
    tx: Option<mpsc::Sender<()>>,
}

impl WakeSignal {
    /// Creates a signal and the receiver a [`Worker`] listens on.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A signal nobody listens to.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Wakes the worker. Never blocks; a full buffer already guarantees a
    /// pending scan.
    pub fn notify(&self) {
        if let Some(tx) = &self.tx {
            if let Err(mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                debug!("Wake signal receiver is gone");
            }
        }
    }
}

/// Supplies work items to a [`Worker`].
#[async_trait]
pub trait WorkSource: Send + Sync + 'static {
    /// A unit of queued work.
    type Item: fmt::Display + Clone + Send + 'static;

    /// Label used in logs, e.g. `plan`.
    fn kind(&self) -> &'static str;

    /// Currently queued items, oldest first.
    async fn queued(&self) -> Result<Vec<Self::Item>, CoreError>;

    /// Runs one item to a terminal state.
    async fn execute(&self, item: Self::Item) -> Result<TaskState, CoreError>;

    /// Ends an item whose execution panicked, so it does not stay running.
    async fn abandon(&self, item: Self::Item, reason: &str) -> Result<(), CoreError>;
}

/// Text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Polling loop over a [`WorkSource`].
pub struct Worker<S: WorkSource> {
    source: Arc<S>,
    poll_interval: Duration,
    wake: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

impl<S: WorkSource> Worker<S> {
    /// Creates a worker. It stops once `cancel` fires.
    pub fn new(
        source: Arc<S>,
        poll_interval: Duration,
        wake: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            poll_interval,
            wake,
            cancel,
        }
    }

    /// Runs the loop on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs the loop until cancelled. The item in progress at cancellation
    /// is allowed to finish; no further items start.
    pub async fn run(mut self) {
        let kind = self.source.kind();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            worker = kind,
            interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Worker started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(()) = self.wake.recv() => {
                    while self.wake.try_recv().is_ok() {}
                }
                _ = ticker.tick() => {}
            }
            self.drain().await;
        }

        info!(worker = kind, "Worker stopped");
    }

    async fn drain(&self) {
        let kind = self.source.kind();
        let items = match self.source.queued().await {
            Ok(items) => items,
            Err(err) => {
                error!(worker = kind, error = %err, "Failed to scan for queued work");
                return;
            }
        };
        if !items.is_empty() {
            debug!(worker = kind, count = items.len(), "Found queued work");
        }

        for item in items {
            if self.cancel.is_cancelled() {
                break;
            }
            let label = item.to_string();
            let retained = item.clone();
            let source = Arc::clone(&self.source);
            match tokio::spawn(async move { source.execute(item).await }).await {
                Ok(Ok(state)) => debug!(worker = kind, item = %label, %state, "Work item finished"),
                Ok(Err(err)) => {
                    error!(worker = kind, item = %label, error = %err, "Work item errored");
                }
                Err(join) if join.is_panic() => {
                    let reason = format!("worker panicked: {}", panic_message(&*join.into_panic()));
                    error!(worker = kind, item = %label, %reason, "Work item panicked");
                    if let Err(err) = self.source.abandon(retained, &reason).await {
                        error!(worker = kind, item = %label, error = %err, "Failed to mark panicked item as failed");
                    }
                }
                Err(join) => warn!(worker = kind, item = %label, error = %join, "Work item aborted"),
            }
        }
    }
}
