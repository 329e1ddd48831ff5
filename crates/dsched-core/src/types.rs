//! Domain types shared by the runtime, the store, and the operator surfaces.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Terminal outcome of one supervised `run()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status \"{0}\"; expected completed, failed, or cancelled")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Informational ordering hint. Never used to preempt a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Critical => write!(f, "critical"),
        }
    }
}

pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Retry and timeout policy applied by the supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPolicy {
    pub priority: JobPriority,
    /// Maximum number of payload attempts. Zero is tolerated and always fails.
    pub retry_count: u32,
    /// Fixed pause between attempts; no backoff growth.
    pub retry_delay: Duration,
    /// Per-attempt deadline.
    pub timeout: Duration,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            priority: JobPriority::default(),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// What a work payload hands back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    pub result: Option<Value>,
    pub statistics: BTreeMap<String, Value>,
}

impl JobOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn with_statistic(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.statistics.insert(key.into(), value.into());
        self
    }
}

/// Immutable record of one `run()` invocation.
///
/// Built only through [`JobResult::completed`], [`JobResult::failed`] and
/// [`JobResult::cancelled`]; there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    job_id: String,
    job_name: String,
    status: JobStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    error: Option<String>,
    statistics: Option<BTreeMap<String, Value>>,
    attempts: u32,
}

impl JobResult {
    #[must_use]
    pub fn completed(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        started_at: DateTime<Utc>,
        output: JobOutput,
        attempts: u32,
    ) -> Self {
        let statistics = (!output.statistics.is_empty()).then_some(output.statistics);
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            status: JobStatus::Completed,
            started_at,
            completed_at: Some(Utc::now()),
            result: output.result,
            error: None,
            statistics,
            attempts,
        }
    }

    #[must_use]
    pub fn failed(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            status: JobStatus::Failed,
            started_at,
            completed_at: Some(Utc::now()),
            result: None,
            error: Some(error.into()),
            statistics: None,
            attempts,
        }
    }

    /// A run that never started. No completion time, so no duration.
    #[must_use]
    pub fn cancelled(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_name: job_name.into(),
            status: JobStatus::Cancelled,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: Some(error.into()),
            statistics: None,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn statistics(&self) -> Option<&BTreeMap<String, Value>> {
        self.statistics.as_ref()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `completed_at - started_at`, absent when the run never completed.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }
}

/// Flat, append-only projection of a [`JobResult`] as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Store-assigned id; absent until the record has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub job_id: String,
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub error: Option<String>,
    pub statistics: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    #[must_use]
    pub fn from_result(result: &JobResult) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let duration_secs = result
            .duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0);

        Self {
            id: None,
            job_id: result.job_id.clone(),
            job_name: result.job_name.clone(),
            status: result.status,
            started_at: result.started_at,
            completed_at: result.completed_at,
            duration_secs,
            error: result.error.clone(),
            statistics: result.statistics.clone(),
            attempts: result.attempts,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_parses_case_insensitively() {
        assert_eq!("FAILED".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert_eq!(
            "canceled".parse::<JobStatus>().unwrap(),
            JobStatus::Cancelled
        );
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn job_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = JobPolicy::default();
        assert_eq!(policy.priority, JobPriority::Normal);
        assert_eq!(policy.retry_count, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(60));
        assert_eq!(policy.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn completed_result_has_duration_and_no_error() {
        let started = Utc::now() - chrono::Duration::seconds(5);
        let output = JobOutput::new()
            .with_result(serde_json::json!({ "count": 1 }))
            .with_statistic("processed", 10);
        let result = JobResult::completed("sync", "Order sync", started, output, 1);

        assert_eq!(result.status(), JobStatus::Completed);
        assert!(result.error().is_none());
        assert!(result.duration().unwrap() >= chrono::Duration::seconds(5));
        assert_eq!(result.statistics().unwrap()["processed"], 10);
    }

    #[test]
    fn empty_statistics_are_absent() {
        let result = JobResult::completed("sync", "Order sync", Utc::now(), JobOutput::new(), 1);
        assert!(result.statistics().is_none());
    }

    #[test]
    fn cancelled_result_has_no_duration() {
        let result = JobResult::cancelled("sync", "Order sync", "job already running");
        assert_eq!(result.status(), JobStatus::Cancelled);
        assert!(result.duration().is_none());
        assert_eq!(result.attempts(), 0);
    }

    #[test]
    fn history_record_projects_result_fields() {
        let started = Utc::now() - chrono::Duration::milliseconds(1500);
        let result = JobResult::failed("sync", "Order sync", started, "timeout after 5s", 3);
        let record = HistoryRecord::from_result(&result);

        assert!(record.id.is_none());
        assert_eq!(record.job_id, "sync");
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("timeout after 5s"));
        assert_eq!(record.attempts, 3);
        assert!(record.duration_secs.unwrap() >= 1.5);
    }

    #[test]
    fn history_record_omits_missing_id_when_serialized() {
        let result = JobResult::cancelled("sync", "Order sync", "job already running");
        let value = serde_json::to_value(HistoryRecord::from_result(&result)).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["status"], "cancelled");
    }
}
