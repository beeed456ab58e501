//! Database operations for training batches.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::BatchStore;
use crate::types::{BatchStatus, TrainingBatch};
use crate::Result;

/// Repository for training batch rows.
pub struct BatchRepository {
    pool: PgPool,
}

impl BatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_batch(r: &sqlx::postgres::PgRow) -> Result<TrainingBatch> {
        let window_ids: Vec<String> = serde_json::from_str(&r.get::<String, _>("window_ids"))?;
        let trajectory_ids: Vec<Uuid> =
            serde_json::from_str(&r.get::<String, _>("trajectory_ids"))?;
        let hyperparameters = serde_json::from_str(&r.get::<String, _>("hyperparameters"))?;

        Ok(TrainingBatch {
            id: r.get("id"),
            job_id: r.get("job_id"),
            base_model: r.get("base_model"),
            hyperparameters,
            window_ids,
            trajectory_ids,
            status: BatchStatus::from_i16(r.get("status")),
            submitted_at: r.get("submitted_at"),
            completed_at: r.get("completed_at"),
            checkpoint_ref: r.get("checkpoint_ref"),
            failure_reason: r.get("failure_reason"),
        })
    }
}

const BATCH_COLUMNS: &str = r#"
    id, job_id, base_model, hyperparameters, window_ids, trajectory_ids,
    status, submitted_at, completed_at, checkpoint_ref, failure_reason
"#;

#[async_trait]
impl BatchStore for BatchRepository {
    async fn insert_batch(&self, batch: &TrainingBatch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO training_batches (
                id, job_id, base_model, hyperparameters, window_ids,
                trajectory_ids, status, submitted_at, completed_at,
                checkpoint_ref, failure_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(batch.id)
        .bind(&batch.job_id)
        .bind(&batch.base_model)
        .bind(serde_json::to_string(&batch.hyperparameters)?)
        .bind(serde_json::to_string(&batch.window_ids)?)
        .bind(serde_json::to_string(&batch.trajectory_ids)?)
        .bind(batch.status.as_i16())
        .bind(batch.submitted_at)
        .bind(batch.completed_at)
        .bind(&batch.checkpoint_ref)
        .bind(&batch.failure_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_batch(&self, batch: &TrainingBatch) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE training_batches SET
                job_id = $2,
                status = $3,
                completed_at = $4,
                checkpoint_ref = $5,
                failure_reason = $6
            WHERE id = $1
            "#,
        )
        .bind(batch.id)
        .bind(&batch.job_id)
        .bind(batch.status.as_i16())
        .bind(batch.completed_at)
        .bind(&batch.checkpoint_ref)
        .bind(&batch.failure_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<TrainingBatch>> {
        let row = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM training_batches WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_batch).transpose()
    }

    async fn find_open(&self) -> Result<Option<TrainingBatch>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM training_batches
            WHERE status IN (0, 1)
            ORDER BY submitted_at DESC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_batch).transpose()
    }

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<TrainingBatch>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM training_batches
            WHERE status = $1
            ORDER BY submitted_at DESC
            "#
        ))
        .bind(status.as_i16())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_batch).collect()
    }
}
