//! Error types for job construction, trigger binding and notification.

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors raised while building jobs or driving the trigger engine.
///
/// Registry operations log these and report `None`/`false` to callers;
/// they never reach a trigger firing.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("trigger engine error: {0}")]
    Engine(String),
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Engine(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification endpoint returned HTTP {status}")]
    UnexpectedStatus { status: u16 },
}
