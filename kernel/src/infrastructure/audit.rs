use serde::Serialize;
use tracing::{info, info_span};

/// Domain event for audit logging.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// The control plane started.
    SystemStartup {
        /// Process or subsystem name.
        component: String,
    },
    /// The control plane is stopping.
    SystemShutdown {
        /// Why it stopped.
        reason: String,
    },
    /// A changeset and its branch were created.
    ChangesetCreated {
        /// Changeset name.
        changeset: String,
    },
    /// A changeset was merged into trunk.
    ChangesetMerged {
        /// Changeset name.
        changeset: String,
        /// Merge attempt id.
        merge_id: i64,
        /// Applies queued by the merge.
        cascaded_applies: usize,
    },
    /// A changeset branch was rebased onto trunk.
    ChangesetRebased {
        /// Changeset name.
        changeset: String,
        /// Rebase attempt id, absent when already current.
        rebase_id: Option<i64>,
    },
    /// A changeset was closed and its branch deleted.
    ChangesetClosed {
        /// Changeset name.
        changeset: String,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a secure file.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Audit event");
}
