//! PostgreSQL implementation of ArtifactStore
//!
//! Artifact metadata lives in `drops`; content is content-addressed in
//! `drop_blobs` keyed by sha256. Versions are assigned inside a
//! transaction holding the key's version chain, so they are gap-free
//! under concurrent writers.

use async_trait::async_trait;
use qlflow_core::{content_hash, Artifact, ArtifactKind, ArtifactMeta};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{ArtifactStore, PutArtifact, StoreError};

/// PostgreSQL artifact store
///
/// # Example
///
/// ```ignore
/// use qlflow_store::PostgresArtifactStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/qlflow").await?;
/// let store = PostgresArtifactStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresArtifactStore {
    pool: PgPool,
}

impl PostgresArtifactStore {
    /// Create a store backed by the given connection pool
    ///
    /// The `drops` schema ships with the engine's migration set, which
    /// owns the relational store layout.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_meta(row: &sqlx::postgres::PgRow) -> Result<ArtifactMeta, StoreError> {
        let kind_str: String = row.get("kind");
        let kind: ArtifactKind = kind_str
            .parse()
            .map_err(|e: qlflow_core::EngineError| StoreError::Serialization(e.to_string()))?;

        Ok(ArtifactMeta {
            id: row.get("id"),
            workflow_id: row.get("workflow_id"),
            stage: row.get("stage"),
            kind,
            version: row.get::<i32, _>("version") as u32,
            size: row.get::<i64, _>("size") as u64,
            hash: row.get("hash"),
            content_type: row.get("content_type"),
            template_fallback: row.get("template_fallback"),
            producing_activity_id: row.get("producing_activity_id"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ArtifactStore for PostgresArtifactStore {
    #[instrument(skip(self, req), fields(workflow_id = %req.workflow_id, stage = %req.stage))]
    async fn put(&self, req: PutArtifact) -> Result<ArtifactMeta, StoreError> {
        let hash = content_hash(&req.content);
        let id = Uuid::now_v7();
        let content_type = req
            .content_type
            .clone()
            .unwrap_or_else(|| req.kind.content_type().to_string());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        // Dedup the blob by hash
        sqlx::query(
            r#"
            INSERT INTO drop_blobs (hash, content)
            VALUES ($1, $2)
            ON CONFLICT (hash) DO NOTHING
            "#,
        )
        .bind(&hash)
        .bind(&req.content)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        // Next version for the key, assigned in the insert itself; the
        // unique constraint on (workflow, stage, kind, version) rejects
        // the write if a concurrent writer slips in (engine serializes
        // writes per workflow, so this is a safety net, not a hot path)
        let row = sqlx::query(
            r#"
            INSERT INTO drops
                (id, workflow_id, stage, kind, version, size, hash, content_type,
                 template_fallback, producing_activity_id)
            SELECT $1, $2, $3, $4, COALESCE(MAX(version), 0) + 1, $5, $6, $7, $8, $9
            FROM drops
            WHERE workflow_id = $2 AND stage = $3 AND kind = $4
            RETURNING version, created_at
            "#,
        )
        .bind(id)
        .bind(req.workflow_id)
        .bind(&req.stage)
        .bind(req.kind.as_str())
        .bind(req.content.len() as i64)
        .bind(&hash)
        .bind(&content_type)
        .bind(req.template_fallback)
        .bind(req.producing_activity_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("failed to insert drop: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let version: i32 = row.get("version");
        let created_at = row.get("created_at");

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(%id, version, "stored drop");

        Ok(ArtifactMeta {
            id,
            workflow_id: req.workflow_id,
            stage: req.stage,
            kind: req.kind,
            version: version as u32,
            size: req.content.len() as u64,
            hash,
            content_type,
            template_fallback: req.template_fallback,
            producing_activity_id: req.producing_activity_id,
            created_at,
        })
    }

    #[instrument(skip(self))]
    async fn get_latest(
        &self,
        workflow_id: Uuid,
        stage: &str,
        kind: ArtifactKind,
    ) -> Result<Option<Artifact>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT d.id, d.workflow_id, d.stage, d.kind, d.version, d.size, d.hash,
                   d.content_type, d.template_fallback, d.producing_activity_id,
                   d.created_at, b.content
            FROM drops d
            JOIN drop_blobs b ON b.hash = d.hash
            WHERE d.workflow_id = $1 AND d.stage = $2 AND d.kind = $3
              AND d.deleted_at IS NULL
            ORDER BY d.version DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .bind(stage)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        match row {
            Some(row) => {
                let meta = Self::row_to_meta(&row)?;
                let content: Vec<u8> = row.get("content");
                Ok(Some(Artifact { meta, content }))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, artifact_id: Uuid) -> Result<Artifact, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT d.id, d.workflow_id, d.stage, d.kind, d.version, d.size, d.hash,
                   d.content_type, d.template_fallback, d.producing_activity_id,
                   d.created_at, b.content
            FROM drops d
            JOIN drop_blobs b ON b.hash = d.hash
            WHERE d.id = $1 AND d.deleted_at IS NULL
            "#,
        )
        .bind(artifact_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::NotFound(artifact_id))?;

        let meta = Self::row_to_meta(&row)?;
        let content: Vec<u8> = row.get("content");
        Ok(Artifact { meta, content })
    }

    #[instrument(skip(self))]
    async fn list(&self, workflow_id: Uuid) -> Result<Vec<ArtifactMeta>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, stage, kind, version, size, hash, content_type,
                   template_fallback, producing_activity_id, created_at
            FROM drops
            WHERE workflow_id = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC, version ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_meta).collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, artifact_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE drops SET deleted_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(artifact_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(artifact_id));
        }
        Ok(())
    }
}
