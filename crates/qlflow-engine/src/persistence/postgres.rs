//! PostgreSQL implementation of WorkflowStore
//!
//! Workflow rows carry the lease columns; checkpoint writes verify lease
//! ownership inside the same transaction that updates state, which is the
//! fencing point for workers that lost their lease.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qlflow_core::{
    ActivityOutcome, ActivityRecord, ErrorKind, PipelineVariant, StageRecord, StageStatus,
    WorkflowInput, WorkflowRecord, WorkflowStatus,
};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{ControlFlags, StoreError, WorkflowStore};

/// PostgreSQL workflow store
#[derive(Clone)]
pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    /// Create a store backed by the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the schema migrations
    ///
    /// Owns the full relational layout: workflow state, stage
    /// checkpoints, activity records, and the artifact index.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn db_err(e: sqlx::Error) -> StoreError {
        StoreError::Database(e.to_string())
    }

    fn workflow_from_row(
        row: &sqlx::postgres::PgRow,
        stages: Vec<StageRecord>,
    ) -> Result<WorkflowRecord, StoreError> {
        let variant_str: String = row.get("variant");
        let status_str: String = row.get("status");
        let input_json: serde_json::Value = row.get("input");

        let variant: PipelineVariant = variant_str
            .parse()
            .map_err(|e: qlflow_core::EngineError| StoreError::Serialization(e.to_string()))?;
        let status: WorkflowStatus = status_str
            .parse()
            .map_err(|e: qlflow_core::EngineError| StoreError::Serialization(e.to_string()))?;
        let input: WorkflowInput = serde_json::from_value(input_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let error_kind: Option<String> = row.get("error_kind");

        Ok(WorkflowRecord {
            id: row.get("id"),
            variant,
            input,
            status,
            current_stage: row.get::<i32, _>("current_stage") as u32,
            error_kind: error_kind.and_then(|k| parse_error_kind(&k)),
            error_message: row.get("error_message"),
            event_seq: row.get::<i64, _>("event_seq") as u64,
            cost_usd: row.get("cost_usd"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            stages,
        })
    }

    fn stage_from_row(row: &sqlx::postgres::PgRow) -> Result<StageRecord, StoreError> {
        let status_str: String = row.get("status");
        let status: StageStatus = status_str
            .parse()
            .map_err(|e: qlflow_core::EngineError| StoreError::Serialization(e.to_string()))?;
        let error_kind: Option<String> = row.get("error_kind");

        Ok(StageRecord {
            ord: row.get::<i32, _>("ord") as u32,
            name: row.get("name"),
            status,
            attempts: row.get::<i32, _>("attempts") as u32,
            error_kind: error_kind.and_then(|k| parse_error_kind(&k)),
            error_message: row.get("error_message"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            artifact_id: row.get("artifact_id"),
        })
    }

    async fn load_stages(&self, workflow_id: Uuid) -> Result<Vec<StageRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ord, name, status, attempts, error_kind, error_message,
                   started_at, finished_at, artifact_id
            FROM workflow_stages
            WHERE workflow_id = $1
            ORDER BY ord ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::db_err)?;

        rows.iter().map(Self::stage_from_row).collect()
    }

    async fn upsert_stages(
        tx: &mut Transaction<'_, Postgres>,
        record: &WorkflowRecord,
    ) -> Result<(), StoreError> {
        for stage in &record.stages {
            sqlx::query(
                r#"
                INSERT INTO workflow_stages
                    (workflow_id, ord, name, status, attempts, error_kind,
                     error_message, started_at, finished_at, artifact_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (workflow_id, ord) DO UPDATE SET
                    status = EXCLUDED.status,
                    attempts = EXCLUDED.attempts,
                    error_kind = EXCLUDED.error_kind,
                    error_message = EXCLUDED.error_message,
                    started_at = EXCLUDED.started_at,
                    finished_at = EXCLUDED.finished_at,
                    artifact_id = EXCLUDED.artifact_id
                "#,
            )
            .bind(record.id)
            .bind(stage.ord as i32)
            .bind(&stage.name)
            .bind(stage.status.to_string())
            .bind(stage.attempts as i32)
            .bind(stage.error_kind.map(|k| k.as_str()))
            .bind(&stage.error_message)
            .bind(stage.started_at)
            .bind(stage.finished_at)
            .bind(stage.artifact_id)
            .execute(&mut **tx)
            .await
            .map_err(Self::db_err)?;
        }
        Ok(())
    }
}

fn parse_error_kind(s: &str) -> Option<ErrorKind> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    #[instrument(skip(self, record), fields(workflow_id = %record.id))]
    async fn create_workflow(&self, record: &WorkflowRecord) -> Result<(), StoreError> {
        let input = serde_json::to_value(&record.input)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(Self::db_err)?;

        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, variant, input, status, current_stage, event_seq, cost_usd, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.variant.to_string())
        .bind(&input)
        .bind(record.status.to_string())
        .bind(record.current_stage as i32)
        .bind(record.event_seq as i64)
        .bind(record.cost_usd)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("failed to create workflow: {}", e);
            Self::db_err(e)
        })?;

        Self::upsert_stages(&mut tx, record).await?;
        tx.commit().await.map_err(Self::db_err)?;

        debug!(%record.id, "created workflow");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, variant, input, status, current_stage, error_kind, error_message,
                   event_seq, cost_usd, created_at, started_at, finished_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::db_err)?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        let stages = self.load_stages(workflow_id).await?;
        Self::workflow_from_row(&row, stages)
    }

    #[instrument(skip(self))]
    async fn list_workflows(
        &self,
        status: Option<WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, variant, input, status, current_stage, error_kind, error_message,
                   event_seq, cost_usd, created_at, started_at, finished_at
            FROM workflows
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::db_err)?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.get("id");
            let stages = self.load_stages(id).await?;
            workflows.push(Self::workflow_from_row(row, stages)?);
        }
        Ok(workflows)
    }

    #[instrument(skip(self, record), fields(workflow_id = %record.id))]
    async fn checkpoint(&self, record: &WorkflowRecord, owner: &str) -> Result<(), StoreError> {
        let input = serde_json::to_value(&record.input)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(Self::db_err)?;

        // Fencing: the update only matches while we hold a live lease
        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                input = $2,
                status = $3,
                current_stage = $4,
                error_kind = $5,
                error_message = $6,
                event_seq = $7,
                cost_usd = $8,
                started_at = $9,
                finished_at = $10
            WHERE id = $1 AND lease_owner = $11 AND lease_expires_at > NOW()
            "#,
        )
        .bind(record.id)
        .bind(&input)
        .bind(record.status.to_string())
        .bind(record.current_stage as i32)
        .bind(record.error_kind.map(|k| k.as_str()))
        .bind(&record.error_message)
        .bind(record.event_seq as i64)
        .bind(record.cost_usd)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(owner)
        .execute(&mut *tx)
        .await
        .map_err(Self::db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::LeaseNotHeld {
                workflow_id: record.id,
                owner: owner.to_string(),
            });
        }

        Self::upsert_stages(&mut tx, record).await?;
        tx.commit().await.map_err(Self::db_err)?;
        Ok(())
    }

    #[instrument(skip(self, record))]
    async fn append_activity(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_activities
                (id, workflow_id, stage_ord, activity, target, attempt, provider,
                 request_digest, latency_ms, outcome, error_kind, tokens_in,
                 tokens_out, cost_usd, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(record.workflow_id)
        .bind(record.stage_ord as i32)
        .bind(&record.activity)
        .bind(&record.target)
        .bind(record.attempt as i32)
        .bind(&record.provider)
        .bind(&record.request_digest)
        .bind(record.latency_ms as i64)
        .bind(record.outcome.to_string())
        .bind(record.error_kind.map(|k| k.as_str()))
        .bind(record.tokens_in.map(|t| t as i64))
        .bind(record.tokens_out.map(|t| t as i64))
        .bind(record.cost_usd)
        .bind(record.started_at)
        .bind(record.finished_at)
        .execute(&self.pool)
        .await
        .map_err(Self::db_err)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_activities(&self, workflow_id: Uuid) -> Result<Vec<ActivityRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, stage_ord, activity, target, attempt, provider,
                   request_digest, latency_ms, outcome, error_kind, tokens_in,
                   tokens_out, cost_usd, started_at, finished_at
            FROM workflow_activities
            WHERE workflow_id = $1
            ORDER BY started_at ASC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::db_err)?;

        rows.iter()
            .map(|row| {
                let outcome_str: String = row.get("outcome");
                let outcome = match outcome_str.as_str() {
                    "succeeded" => ActivityOutcome::Succeeded,
                    "cancelled" => ActivityOutcome::Cancelled,
                    _ => ActivityOutcome::Failed,
                };
                let error_kind: Option<String> = row.get("error_kind");

                Ok(ActivityRecord {
                    id: row.get("id"),
                    workflow_id: row.get("workflow_id"),
                    stage_ord: row.get::<i32, _>("stage_ord") as u32,
                    activity: row.get("activity"),
                    target: row.get("target"),
                    attempt: row.get::<i32, _>("attempt") as u32,
                    provider: row.get("provider"),
                    request_digest: row.get("request_digest"),
                    latency_ms: row.get::<i64, _>("latency_ms") as u64,
                    outcome,
                    error_kind: error_kind.and_then(|k| parse_error_kind(&k)),
                    tokens_in: row.get::<Option<i64>, _>("tokens_in").map(|t| t as u64),
                    tokens_out: row.get::<Option<i64>, _>("tokens_out").map(|t| t as u64),
                    cost_usd: row.get("cost_usd"),
                    started_at: row.get("started_at"),
                    finished_at: row.get("finished_at"),
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn request_cancel(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE workflows SET cancel_requested = TRUE WHERE id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(Self::db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn request_pause(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE workflows SET pause_requested = TRUE WHERE id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(Self::db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn clear_pause(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE workflows SET pause_requested = FALSE WHERE id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await
            .map_err(Self::db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(workflow_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn control_flags(&self, workflow_id: Uuid) -> Result<ControlFlags, StoreError> {
        let row = sqlx::query(
            "SELECT cancel_requested, pause_requested FROM workflows WHERE id = $1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::db_err)?
        .ok_or(StoreError::WorkflowNotFound(workflow_id))?;

        Ok(ControlFlags {
            cancel_requested: row.get("cancel_requested"),
            pause_requested: row.get("pause_requested"),
        })
    }

    #[instrument(skip(self))]
    async fn acquire_lease(
        &self,
        workflow_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let expires: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE workflows SET lease_owner = $2, lease_expires_at = $3
            WHERE id = $1
              AND (lease_owner IS NULL OR lease_owner = $2 OR lease_expires_at <= NOW())
            "#,
        )
        .bind(workflow_id)
        .bind(owner)
        .bind(expires)
        .execute(&self.pool)
        .await
        .map_err(Self::db_err)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn renew_lease(
        &self,
        workflow_id: Uuid,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let expires: DateTime<Utc> = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE workflows SET lease_expires_at = $3
            WHERE id = $1 AND lease_owner = $2 AND lease_expires_at > NOW()
            "#,
        )
        .bind(workflow_id)
        .bind(owner)
        .bind(expires)
        .execute(&self.pool)
        .await
        .map_err(Self::db_err)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn release_lease(&self, workflow_id: Uuid, owner: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflows SET lease_owner = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_owner = $2
            "#,
        )
        .bind(workflow_id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(Self::db_err)?;
        Ok(())
    }
}
