//! Process-local [`DocumentStore`] used in development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{
    matches_filter, strip_reserved, timestamp_of, with_meta, DocumentStore, Record,
};
use crate::DbError;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    data: Record,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredDocument {
    fn to_record(&self) -> Record {
        with_meta(self.data.clone(), &self.id, self.created_at, self.updated_at)
    }
}

/// Collections held in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, record: Record) -> Result<Record, DbError> {
        let now = Utc::now();
        let doc = StoredDocument {
            id: Uuid::new_v4().to_string(),
            data: strip_reserved(record),
            created_at: now,
            updated_at: now,
        };
        let stored = doc.to_record();
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(stored)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, DbError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .map(StoredDocument::to_record))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Record,
    ) -> Result<Option<Record>, DbError> {
        let mut collections = self.collections.write().await;
        let Some(doc) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
        else {
            return Ok(None);
        };
        doc.data.extend(strip_reserved(patch));
        doc.updated_at = Utc::now();
        Ok(Some(doc.to_record()))
    }

    async fn list(
        &self,
        collection: &str,
        filter: &Record,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, DbError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|d| matches_filter(&d.data, filter))
            .take(limit.unwrap_or(usize::MAX))
            .map(StoredDocument::to_record)
            .collect())
    }

    async fn list_recent(
        &self,
        collection: &str,
        filter: &Record,
        time_field: &str,
        limit: usize,
    ) -> Result<Vec<Record>, DbError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        // newest inserts first, so equal timestamps also come back newest first
        let mut matching: Vec<(Option<DateTime<Utc>>, &StoredDocument)> = docs
            .iter()
            .rev()
            .filter(|d| matches_filter(&d.data, filter))
            .map(|d| (timestamp_of(&d.data, time_field), d))
            .collect();
        matching.sort_by_key(|(at, _)| std::cmp::Reverse(*at));

        Ok(matching
            .into_iter()
            .take(limit)
            .map(|(_, d)| d.to_record())
            .collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, DbError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        Ok(docs.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let store = MemoryStore::new();
        let created = store
            .create("orders", record(json!({ "sku": "A-1" })))
            .await
            .unwrap();

        assert!(created["id"].as_str().is_some());
        assert!(created.contains_key("created_at"));
        assert_eq!(created["sku"], "A-1");
        assert_eq!(store.count("orders").await, 1);
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let store = MemoryStore::new();
        assert!(store.get("orders", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_merges_patch() {
        let store = MemoryStore::new();
        let created = store
            .create("orders", record(json!({ "sku": "A-1", "status": "new" })))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let updated = store
            .update("orders", id, record(json!({ "status": "shipped" })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["status"], "shipped");
        assert_eq!(updated["sku"], "A-1");
        assert_eq!(updated["id"], id);
    }

    #[tokio::test]
    async fn update_unknown_id_is_none() {
        let store = MemoryStore::new();
        let result = store
            .update("orders", "nope", record(json!({ "status": "x" })))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn list_filters_and_limits_in_insertion_order() {
        let store = MemoryStore::new();
        for (n, status) in ["failed", "completed", "failed", "failed"].iter().enumerate() {
            store
                .create("job_history", record(json!({ "n": n, "status": status })))
                .await
                .unwrap();
        }

        let filter = record(json!({ "status": "failed" }));
        let all = store.list("job_history", &filter, None).await.unwrap();
        let ns: Vec<i64> = all.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 2, 3]);

        let limited = store.list("job_history", &filter, Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);

        let first = store.find_one("job_history", &filter).await.unwrap().unwrap();
        assert_eq!(first["n"], 0);
    }

    #[tokio::test]
    async fn list_recent_returns_newest_started_first() {
        let store = MemoryStore::new();
        for (n, started_at) in [
            "2026-03-01T09:00:02Z",
            "2026-03-01T09:00:00.500Z",
            "2026-03-01T09:00:03Z",
            "2026-03-01T09:00:01Z",
        ]
        .iter()
        .enumerate()
        {
            store
                .create(
                    "job_history",
                    record(json!({ "n": n, "status": "failed", "started_at": started_at })),
                )
                .await
                .unwrap();
        }

        let filter = record(json!({ "status": "failed" }));
        let recent = store
            .list_recent("job_history", &filter, "started_at", 3)
            .await
            .unwrap();
        let ns: Vec<i64> = recent.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![2, 0, 3]);

        let completed = record(json!({ "status": "completed" }));
        let none = store
            .list_recent("job_history", &completed, "started_at", 3)
            .await
            .unwrap();
        assert!(none.is_empty());
        assert!(store
            .list_recent("missing", &Record::new(), "started_at", 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = MemoryStore::new();
        let created = store
            .create("orders", record(json!({ "sku": "A-1" })))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        assert!(store.delete("orders", id).await.unwrap());
        assert!(!store.delete("orders", id).await.unwrap());
        assert!(!store.delete("missing", id).await.unwrap());
    }
}
