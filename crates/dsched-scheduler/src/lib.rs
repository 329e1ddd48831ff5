//! Supervised job runtime.
//!
//! A [`Job`] turns a [`Work`] payload into a retryable, timeout-bounded,
//! reject-if-busy execution. The [`JobRegistry`] binds jobs to cron or
//! interval [`Trigger`]s on top of `tokio-cron-scheduler` and routes every
//! firing through the [`ExecutionHandler`], which records history and raises
//! failure notifications.

mod error;
mod guard;
mod handler;
mod hook;
mod job;
mod notify;
mod registry;
mod trigger;

pub use error::{NotifyError, SchedulerError};
pub use guard::{RunGuard, RunPermit};
pub use handler::{ExecutionHandler, DEFAULT_MEMORY_LIMIT};
pub use hook::{job_from_definition, HttpHookWork};
pub use job::{Job, JobContext, Work, ALREADY_RUNNING, UNKNOWN_ERROR};
pub use notify::{notifier_from_config, LogNotifier, Notifier, WebhookNotifier};
pub use registry::{JobInfo, JobRegistry, RunStats, RunTotals, ScheduleSummary};
pub use trigger::Trigger;
