//! Shared table of in-flight/terminal job records, used by the scheduler to
//! publish status transitions and by the facade to await them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{JobStatus, TerminalReason};

struct Record {
    status: JobStatus,
    result: Option<serde_json::Value>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct JobRegistry {
    records: Mutex<HashMap<Uuid, Record>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_pending(&self, id: Uuid, cancel: CancellationToken) {
        let mut records = self.records.lock().await;
        records.insert(
            id,
            Record {
                status: JobStatus::Pending,
                result: None,
                notify: Arc::new(Notify::new()),
                cancel,
            },
        );
    }

    /// Requests cancellation of a job by id. Returns `false` if the job is
    /// unknown; the job observes cancellation at its next checkpoint and
    /// transitions to `Terminal { reason: Cancelled, .. }` (a no-op if it
    /// has already reached a terminal state by then).
    pub async fn cancel(&self, id: Uuid) -> bool {
        let records = self.records.lock().await;
        match records.get(&id) {
            Some(record) => {
                record.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn mark_running(&self, id: Uuid) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&id) {
            record.status = JobStatus::Running {
                started_at: Utc::now(),
            };
            record.notify.notify_waiters();
        }
    }

    pub async fn mark_terminal(
        &self,
        id: Uuid,
        reason: TerminalReason,
        code: Option<&'static str>,
        message: Option<String>,
        result: Option<serde_json::Value>,
    ) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&id) {
            record.status = JobStatus::Terminal {
                reason,
                code,
                message,
                ended_at: Utc::now(),
            };
            record.result = result;
            record.notify.notify_waiters();
        }
    }

    pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
        let records = self.records.lock().await;
        records.get(&id).map(|r| r.status.clone())
    }

    pub async fn result(&self, id: Uuid) -> Option<serde_json::Value> {
        let records = self.records.lock().await;
        records.get(&id).and_then(|r| r.result.clone())
    }

    /// Waits up to `timeout` for the job to reach a terminal state. Does
    /// not cancel the job if the wait times out.
    ///
    /// The `Notified` future is created and registered with the `Notify`
    /// *before* the terminal-state check below, not after: `notify_waiters`
    /// wakes only futures already polled at the time it fires and leaves no
    /// stored permit, so checking status first and subscribing second would
    /// lose a `mark_terminal` that lands in between, stalling the wait for
    /// the full timeout.
    pub async fn await_terminal(
        &self,
        id: Uuid,
        timeout: std::time::Duration,
    ) -> Option<JobStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.records.lock().await;
            let record = records.get(&id)?;
            let notify = record.notify.clone();
            // Registers interest in `notify` while still holding the lock
            // `mark_terminal` also takes, so no terminal transition can slip
            // in between this registration and the status read below.
            let notified = notify.notified();
            let status = record.status.clone();
            drop(records);

            if status.is_terminal() {
                return Some(status);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return self.status(id).await;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }
}
