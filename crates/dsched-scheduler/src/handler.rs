//! Execution handler: the isolation boundary between a trigger firing and a
//! job run.
//!
//! Every outcome is kept in a bounded in-memory list and appended to the
//! store's history collection. FAILED outcomes raise a notification. Store
//! and notifier failures are logged and swallowed, and payload panics turn
//! into FAILED results, so nothing propagates back into the trigger engine.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dsched_core::{HistoryRecord, JobResult, JobStatus};
use dsched_db::{append_job_history, list_job_history, DbError, DocumentStore, HistoryFilter};
use futures::FutureExt;

use crate::job::Job;
use crate::notify::Notifier;

pub const DEFAULT_MEMORY_LIMIT: usize = 1000;

pub struct ExecutionHandler {
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    recent: Mutex<VecDeque<JobResult>>,
    memory_limit: usize,
}

impl ExecutionHandler {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            recent: Mutex::new(VecDeque::new()),
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    /// Cap the in-memory result list; the oldest entries are evicted first.
    #[must_use]
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Run `job` once and record the outcome. Never panics and never fails.
    pub async fn handle_fire(&self, job: &Job) -> JobResult {
        let started_at = Utc::now();
        let result = match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let error = format!("job panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(job = %job.id(), error = %error, "scheduler: job panicked");
                JobResult::failed(job.id(), job.name(), started_at, error, 1)
            }
        };

        self.remember(result.clone());
        self.persist(&result).await;
        if result.status() == JobStatus::Failed {
            self.notify_failure(&result).await;
        }

        result
    }

    /// Snapshot of the in-memory results, oldest first.
    pub fn recent_results(&self) -> Vec<JobResult> {
        self.recent_lock().iter().cloned().collect()
    }

    /// Persisted history, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be read.
    pub async fn list_history(&self, filter: &HistoryFilter) -> Result<Vec<HistoryRecord>, DbError> {
        list_job_history(self.store.as_ref(), filter).await
    }

    fn remember(&self, result: JobResult) {
        if self.memory_limit == 0 {
            return;
        }
        let mut recent = self.recent_lock();
        while recent.len() >= self.memory_limit {
            recent.pop_front();
        }
        recent.push_back(result);
    }

    async fn persist(&self, result: &JobResult) {
        let record = HistoryRecord::from_result(result);
        match append_job_history(self.store.as_ref(), &record).await {
            Ok(id) => {
                tracing::debug!(job = %result.job_id(), history_id = %id, "scheduler: history recorded");
            }
            Err(e) => {
                tracing::warn!(
                    job = %result.job_id(),
                    error = %e,
                    "scheduler: failed to persist job history"
                );
            }
        }
    }

    async fn notify_failure(&self, result: &JobResult) {
        let title = format!("Job failed: {}", result.job_name());
        let message = format!(
            "{} ({}) failed after {} attempt(s): {}",
            result.job_name(),
            result.job_id(),
            result.attempts(),
            result.error().unwrap_or(crate::job::UNKNOWN_ERROR),
        );
        if let Err(e) = self.notifier.notify(&title, &message).await {
            tracing::warn!(
                job = %result.job_id(),
                error = %e,
                "scheduler: failed to send failure notification"
            );
        }
    }

    fn recent_lock(&self) -> MutexGuard<'_, VecDeque<JobResult>> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
