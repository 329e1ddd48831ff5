//! Postgres-backed [`DocumentStore`] over the single `documents` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{strip_reserved, with_meta, DocumentStore, Record};
use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `documents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    data: Json<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_record(self) -> Result<Record, DbError> {
        let Value::Object(data) = self.data.0 else {
            return Err(DbError::NotAnObject);
        };
        Ok(with_meta(
            data,
            &self.id.to_string(),
            self.created_at,
            self.updated_at,
        ))
    }
}

const RETURNING: &str = "RETURNING id, data, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Ids that are not UUIDs can never match a row.
fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn create(&self, collection: &str, record: Record) -> Result<Record, DbError> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "INSERT INTO documents (id, collection, data) VALUES ($1, $2, $3) {RETURNING}"
        ))
        .bind(Uuid::new_v4())
        .bind(collection)
        .bind(Json(Value::Object(strip_reserved(record))))
        .fetch_one(&self.pool)
        .await?;

        row.into_record()
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, DbError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data, created_at, updated_at \
             FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_record).transpose()
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Record,
    ) -> Result<Option<Record>, DbError> {
        let Some(id) = parse_id(id) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "UPDATE documents SET data = data || $3, updated_at = NOW() \
             WHERE collection = $1 AND id = $2 {RETURNING}"
        ))
        .bind(collection)
        .bind(id)
        .bind(Json(Value::Object(strip_reserved(patch))))
        .fetch_optional(&self.pool)
        .await?;

        row.map(DocumentRow::into_record).transpose()
    }

    async fn list(
        &self,
        collection: &str,
        filter: &Record,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, DbError> {
        // LIMIT NULL means no limit in Postgres.
        let limit = limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));

        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data, created_at, updated_at \
             FROM documents \
             WHERE collection = $1 AND data @> $2 \
             ORDER BY created_at, id \
             LIMIT $3",
        )
        .bind(collection)
        .bind(Json(Value::Object(filter.clone())))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::into_record).collect()
    }

    async fn list_recent(
        &self,
        collection: &str,
        filter: &Record,
        time_field: &str,
        limit: usize,
    ) -> Result<Vec<Record>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // A value in `time_field` that is not a timestamp fails the cast and
        // the whole query.
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data, created_at, updated_at \
             FROM documents \
             WHERE collection = $1 AND data @> $2 \
             ORDER BY (data->>$3)::timestamptz DESC NULLS LAST, created_at DESC, id DESC \
             LIMIT $4",
        )
        .bind(collection)
        .bind(Json(Value::Object(filter.clone())))
        .bind(time_field)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::into_record).collect()
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, DbError> {
        let Some(id) = parse_id(id) else {
            return Ok(false);
        };

        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
