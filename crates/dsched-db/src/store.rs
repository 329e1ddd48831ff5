//! The key/document store boundary.
//!
//! Records are flat JSON objects grouped into named collections. Every
//! returned record carries the store-managed keys `id`, `created_at` and
//! `updated_at` alongside its own fields.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::DbError;

pub type Record = Map<String, Value>;

pub(crate) const RESERVED_KEYS: [&str; 3] = ["id", "created_at", "updated_at"];

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `record` and return it with its assigned id and timestamps.
    async fn create(&self, collection: &str, record: Record) -> Result<Record, DbError>;

    /// Fetch one record by id. Unknown ids yield `Ok(None)`.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, DbError>;

    /// Shallow-merge `patch` into the record. Unknown ids yield `Ok(None)`.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Record,
    ) -> Result<Option<Record>, DbError>;

    /// Records whose top-level fields equal every entry of `filter`, oldest first.
    async fn list(
        &self,
        collection: &str,
        filter: &Record,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, DbError>;

    /// Returns `false` when nothing was deleted.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, DbError>;

    /// Records matching `filter`, newest first by the RFC 3339 timestamp in
    /// the top-level field `time_field`, at most `limit` of them. Records
    /// without a readable timestamp sort last.
    async fn list_recent(
        &self,
        collection: &str,
        filter: &Record,
        time_field: &str,
        limit: usize,
    ) -> Result<Vec<Record>, DbError> {
        let records = self.list(collection, filter, None).await?;
        Ok(newest_first(records, time_field, limit))
    }

    async fn find_one(&self, collection: &str, filter: &Record) -> Result<Option<Record>, DbError> {
        Ok(self
            .list(collection, filter, Some(1))
            .await?
            .into_iter()
            .next())
    }
}

pub(crate) fn timestamp_of(record: &Record, field: &str) -> Option<DateTime<Utc>> {
    let raw = record.get(field)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub(crate) fn newest_first(
    mut records: Vec<Record>,
    time_field: &str,
    limit: usize,
) -> Vec<Record> {
    // stable sort keeps insertion order between equal timestamps
    records.sort_by_key(|r| std::cmp::Reverse(timestamp_of(r, time_field)));
    records.truncate(limit);
    records
}

pub(crate) fn strip_reserved(mut record: Record) -> Record {
    for key in RESERVED_KEYS {
        record.remove(key);
    }
    record
}

pub(crate) fn with_meta(
    mut data: Record,
    id: &str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Record {
    data.insert("id".to_string(), Value::String(id.to_string()));
    data.insert(
        "created_at".to_string(),
        Value::String(created_at.to_rfc3339()),
    );
    data.insert(
        "updated_at".to_string(),
        Value::String(updated_at.to_rfc3339()),
    );
    data
}

pub(crate) fn matches_filter(record: &Record, filter: &Record) -> bool {
    filter
        .iter()
        .all(|(key, expected)| record.get(key) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let r = record(json!({ "status": "failed" }));
        assert!(matches_filter(&r, &Record::new()));
    }

    #[test]
    fn filter_requires_all_keys_equal() {
        let r = record(json!({ "status": "failed", "job_name": "sync" }));
        assert!(matches_filter(&r, &record(json!({ "status": "failed" }))));
        assert!(!matches_filter(
            &r,
            &record(json!({ "status": "failed", "job_name": "report" }))
        ));
        assert!(!matches_filter(&r, &record(json!({ "missing": 1 }))));
    }

    #[test]
    fn newest_first_orders_by_instant_not_text() {
        let records = vec![
            record(json!({ "n": 0, "started_at": "2026-03-01T09:00:00Z" })),
            record(json!({ "n": 1, "started_at": "2026-03-01T09:00:00.250Z" })),
            record(json!({ "n": 2 })),
            record(json!({ "n": 3, "started_at": "2026-03-01T18:00:00+09:00" })),
        ];

        let sorted = newest_first(records, "started_at", 10);
        let ns: Vec<i64> = sorted.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        // 18:00+09:00 is 09:00Z, so it ties with n=0 and keeps insertion order
        assert_eq!(ns, vec![1, 0, 3, 2]);
    }

    #[test]
    fn newest_first_truncates_after_sorting() {
        let records = vec![
            record(json!({ "n": 0, "started_at": "2026-03-01T09:00:00Z" })),
            record(json!({ "n": 1, "started_at": "2026-03-02T09:00:00Z" })),
        ];
        let sorted = newest_first(records, "started_at", 1);
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0]["n"], 1);
    }

    #[test]
    fn strip_reserved_removes_store_keys() {
        let r = record(json!({ "id": "x", "created_at": "t", "updated_at": "t", "keep": true }));
        let stripped = strip_reserved(r);
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped["keep"], true);
    }
}
