//! The supervised unit of work.
//!
//! A [`Job`] wraps a [`Work`] payload with identity, options and a
//! [`JobPolicy`]. [`Job::run`] is the only entry point: it never returns an
//! error, every outcome is folded into a [`JobResult`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dsched_core::{JobOutput, JobPolicy, JobResult};
use serde_json::{Map, Value};

use crate::guard::RunGuard;

pub const ALREADY_RUNNING: &str = "job already running";
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Per-attempt view handed to a payload.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    pub job_id: &'a str,
    pub job_name: &'a str,
    /// 1-based attempt number within the current `run()`.
    pub attempt: u32,
    pub options: &'a Map<String, Value>,
}

/// The business logic a job supervises.
///
/// Implementations may fail with any error; the runtime retries, bounds each
/// attempt with the job's timeout and may drop the returned future mid-flight.
#[async_trait]
pub trait Work: Send + Sync {
    /// Precondition check run once per `run()`, before the first attempt.
    /// An error fails the run without retrying and without calling `execute`.
    async fn validate(&self, _ctx: &JobContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: &JobContext<'_>) -> anyhow::Result<JobOutput>;
}

/// Why a single attempt did not produce output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttemptError {
    Timeout { secs: f64 },
    Payload(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Timeout { secs } => write!(f, "timeout after {secs}s"),
            AttemptError::Payload(msg) => f.write_str(msg),
        }
    }
}

pub struct Job {
    id: String,
    name: String,
    options: Map<String, Value>,
    policy: JobPolicy,
    work: Arc<dyn Work>,
    guard: RunGuard,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("running", &self.guard.is_running())
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new(id: impl Into<String>, name: impl Into<String>, work: Arc<dyn Work>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            options: Map::new(),
            policy: JobPolicy::default(),
            work,
            guard: RunGuard::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: JobPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    #[must_use]
    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Run the payload under the job's retry and timeout policy.
    ///
    /// A call that overlaps an in-flight run returns CANCELLED immediately
    /// without touching the payload.
    pub async fn run(&self) -> JobResult {
        let Some(_permit) = self.guard.try_acquire() else {
            tracing::warn!(job = %self.id, "scheduler: job already running; run cancelled");
            return JobResult::cancelled(&self.id, &self.name, ALREADY_RUNNING);
        };

        let started_at = Utc::now();
        if let Err(error) = self.run_validation().await {
            let error = format!("validation failed: {error}");
            tracing::error!(job = %self.id, error = %error, "scheduler: job failed validation");
            return JobResult::failed(&self.id, &self.name, started_at, error, 1);
        }

        let attempts = self.policy.retry_count;
        let mut last_error: Option<AttemptError> = None;

        for attempt in 1..=attempts {
            let ctx = self.context(attempt);

            let error = match tokio::time::timeout(self.policy.timeout, self.work.execute(&ctx))
                .await
            {
                Ok(Ok(output)) => {
                    tracing::info!(job = %self.id, attempt, "scheduler: job completed");
                    return JobResult::completed(&self.id, &self.name, started_at, output, attempt);
                }
                Ok(Err(err)) => AttemptError::Payload(format!("{err:#}")),
                Err(_elapsed) => AttemptError::Timeout {
                    secs: self.policy.timeout.as_secs_f64(),
                },
            };

            tracing::warn!(
                job = %self.id,
                attempt,
                max_attempts = attempts,
                error = %error,
                "scheduler: job attempt failed"
            );
            last_error = Some(error);

            if attempt < attempts {
                sleep_before_retry(self.policy.retry_delay).await;
            }
        }

        let error = last_error.map_or_else(|| UNKNOWN_ERROR.to_string(), |e| e.to_string());
        tracing::error!(job = %self.id, attempts, error = %error, "scheduler: job failed");
        JobResult::failed(&self.id, &self.name, started_at, error, attempts)
    }

    /// The payload's precondition check, bounded by the attempt timeout.
    async fn run_validation(&self) -> Result<(), AttemptError> {
        let ctx = self.context(1);
        match tokio::time::timeout(self.policy.timeout, self.work.validate(&ctx)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AttemptError::Payload(format!("{err:#}"))),
            Err(_elapsed) => Err(AttemptError::Timeout {
                secs: self.policy.timeout.as_secs_f64(),
            }),
        }
    }

    fn context(&self, attempt: u32) -> JobContext<'_> {
        JobContext {
            job_id: &self.id,
            job_name: &self.name,
            attempt,
            options: &self.options,
        }
    }
}

async fn sleep_before_retry(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
#[path = "job_test.rs"]
mod tests;
