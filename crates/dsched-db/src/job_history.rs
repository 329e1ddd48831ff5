//! Append-only job execution history on top of a [`DocumentStore`].

use dsched_core::{HistoryRecord, JobStatus};
use serde_json::Value;

use crate::store::{DocumentStore, Record};
use crate::DbError;

pub const JOB_HISTORY_COLLECTION: &str = "job_history";

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Equality filter over history records. Unset fields match everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub job_id: Option<String>,
    pub job_name: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: usize,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            job_id: None,
            job_name: None,
            status: None,
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl HistoryFilter {
    fn to_record(&self) -> Record {
        let mut filter = Record::new();
        if let Some(job_id) = &self.job_id {
            filter.insert("job_id".to_string(), Value::String(job_id.clone()));
        }
        if let Some(job_name) = &self.job_name {
            filter.insert("job_name".to_string(), Value::String(job_name.clone()));
        }
        if let Some(status) = self.status {
            filter.insert(
                "status".to_string(),
                Value::String(status.as_str().to_string()),
            );
        }
        filter
    }
}

/// Persist one history record and return its store-assigned id.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or the store write fails.
pub async fn append_job_history(
    store: &dyn DocumentStore,
    record: &HistoryRecord,
) -> Result<String, DbError> {
    let value = serde_json::to_value(record).map_err(|source| DbError::Serde {
        context: "history record",
        source,
    })?;
    let Value::Object(fields) = value else {
        return Err(DbError::NotAnObject);
    };

    let stored = store.create(JOB_HISTORY_COLLECTION, fields).await?;
    match stored.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        _ => Err(DbError::NotAnObject),
    }
}

/// Matching history records, newest `started_at` first, at most `filter.limit`.
///
/// # Errors
///
/// Returns [`DbError`] if the store read fails or a stored record cannot be
/// decoded.
pub async fn list_job_history(
    store: &dyn DocumentStore,
    filter: &HistoryFilter,
) -> Result<Vec<HistoryRecord>, DbError> {
    let rows = store
        .list_recent(
            JOB_HISTORY_COLLECTION,
            &filter.to_record(),
            "started_at",
            filter.limit,
        )
        .await?;

    rows.into_iter()
        .map(|row| {
            serde_json::from_value::<HistoryRecord>(Value::Object(row)).map_err(|source| {
                DbError::Serde {
                    context: "history record",
                    source,
                }
            })
        })
        .collect()
}
