//! Postgres-backed result store.
//!
//! One row per model in `model_metadata`. A merge is a single upsert:
//!
//! ```sql
//! INSERT ... ON CONFLICT (model_id) DO UPDATE SET col = COALESCE(EXCLUDED.col, model_metadata.col)
//! ```
//!
//! so concurrent writers for different fields of the same model never lose
//! each other's columns, and redelivered writes are idempotent.
//!
//! The [`ResultStore`] trait is synchronous (workers are plain threads), so
//! calls are bridged onto the tokio runtime with [`Handle::block_on`]. Never
//! call `merge`/`get` from inside an async task; use `spawn_blocking`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use printopt_core::EntityKey;

use super::record::{MetadataPatch, ModelMetadata};
use super::store::{ResultStore, ResultStoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS model_metadata (
    model_id               TEXT PRIMARY KEY,
    seo_title              TEXT,
    market_description     TEXT,
    tags                   JSONB,
    vertices               BIGINT,
    polygons               BIGINT,
    file_size_kb           DOUBLE PRECISION,
    complexity_score       DOUBLE PRECISION,
    estimated_time_minutes DOUBLE PRECISION,
    created_at             TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at             TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const COLUMNS: &str = "model_id, seo_title, market_description, tags, vertices, polygons, \
     file_size_kb, complexity_score, estimated_time_minutes, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresResultStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresResultStore {
    /// Must be called from within a tokio runtime; the store keeps its handle.
    pub fn new(pool: PgPool) -> Result<Self, ResultStoreError> {
        let runtime = Handle::try_current()
            .map_err(|e| ResultStoreError::Unavailable(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_runtime(pool, runtime))
    }

    pub fn with_runtime(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Create the `model_metadata` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), ResultStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, patch), fields(model_id = %key), err)]
    pub async fn merge_async(
        &self,
        key: &EntityKey,
        patch: &MetadataPatch,
    ) -> Result<ModelMetadata, ResultStoreError> {
        let sql = format!(
            r#"
            INSERT INTO model_metadata (
                model_id, seo_title, market_description, tags, vertices, polygons,
                file_size_kb, complexity_score, estimated_time_minutes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (model_id) DO UPDATE SET
                seo_title = COALESCE(EXCLUDED.seo_title, model_metadata.seo_title),
                market_description = COALESCE(EXCLUDED.market_description, model_metadata.market_description),
                tags = COALESCE(EXCLUDED.tags, model_metadata.tags),
                vertices = COALESCE(EXCLUDED.vertices, model_metadata.vertices),
                polygons = COALESCE(EXCLUDED.polygons, model_metadata.polygons),
                file_size_kb = COALESCE(EXCLUDED.file_size_kb, model_metadata.file_size_kb),
                complexity_score = COALESCE(EXCLUDED.complexity_score, model_metadata.complexity_score),
                estimated_time_minutes = COALESCE(EXCLUDED.estimated_time_minutes, model_metadata.estimated_time_minutes),
                updated_at = now()
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .bind(patch.seo_title.as_deref())
            .bind(patch.market_description.as_deref())
            .bind(patch.tags.as_ref().map(Json))
            .bind(patch.vertices.map(to_i64).transpose()?)
            .bind(patch.polygons.map(to_i64).transpose()?)
            .bind(patch.file_size_kb)
            .bind(patch.complexity_score)
            .bind(patch.estimated_time_minutes)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("merge", e))?;

        decode_row(&row)
    }

    #[instrument(skip(self), fields(model_id = %key), err)]
    pub async fn get_async(&self, key: &EntityKey) -> Result<Option<ModelMetadata>, ResultStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM model_metadata WHERE model_id = $1");
        let row = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode_row).transpose()
    }
}

impl ResultStore for PostgresResultStore {
    fn merge(
        &self,
        key: &EntityKey,
        patch: &MetadataPatch,
    ) -> Result<ModelMetadata, ResultStoreError> {
        self.runtime.block_on(self.merge_async(key, patch))
    }

    fn get(&self, key: &EntityKey) -> Result<Option<ModelMetadata>, ResultStoreError> {
        self.runtime.block_on(self.get_async(key))
    }
}

fn decode_row(row: &sqlx::postgres::PgRow) -> Result<ModelMetadata, ResultStoreError> {
    let decode = |e: sqlx::Error| ResultStoreError::Storage(format!("failed to decode row: {e}"));

    let model_id: String = row.try_get("model_id").map_err(decode)?;
    let model_id = EntityKey::new(model_id)
        .map_err(|e| ResultStoreError::Storage(format!("invalid model_id in store: {e}")))?;
    let tags: Option<Json<Vec<String>>> = row.try_get("tags").map_err(decode)?;
    let vertices: Option<i64> = row.try_get("vertices").map_err(decode)?;
    let polygons: Option<i64> = row.try_get("polygons").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    Ok(ModelMetadata {
        model_id,
        seo_title: row.try_get("seo_title").map_err(decode)?,
        market_description: row.try_get("market_description").map_err(decode)?,
        tags: tags.map(|t| t.0),
        vertices: vertices.map(|v| v.max(0) as u64),
        polygons: polygons.map(|v| v.max(0) as u64),
        file_size_kb: row.try_get("file_size_kb").map_err(decode)?,
        complexity_score: row.try_get("complexity_score").map_err(decode)?,
        estimated_time_minutes: row.try_get("estimated_time_minutes").map_err(decode)?,
        created_at,
        updated_at,
    })
}

fn to_i64(value: u64) -> Result<i64, ResultStoreError> {
    i64::try_from(value).map_err(|_| ResultStoreError::Storage(format!("value {value} out of range")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ResultStoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ResultStoreError::Unavailable(format!("{operation}: {err}"))
        }
        other => ResultStoreError::Storage(format!("{operation}: {other}")),
    }
}
