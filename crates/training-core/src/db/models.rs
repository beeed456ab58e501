//! Database operations for trained models.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::store::ModelStore;
use crate::types::{DeploymentStatus, ModelMetrics, ModelVersion, TrainedModel};
use crate::Result;

/// Repository for trained model rows.
pub struct ModelRepository {
    pool: PgPool,
}

impl ModelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_model(r: &sqlx::postgres::PgRow) -> TrainedModel {
        TrainedModel {
            version: ModelVersion::new(
                r.get::<i32, _>("major") as u32,
                r.get::<i32, _>("minor") as u32,
                r.get::<i32, _>("patch") as u32,
            ),
            base_model: r.get("base_model"),
            storage_path: r.get("storage_path"),
            metrics: ModelMetrics {
                avg_score: r.get("avg_score"),
                avg_outcome: r.get("avg_outcome"),
                trajectory_count: r.get::<i64, _>("trajectory_count") as u64,
                window_count: r.get::<i64, _>("window_count") as u64,
            },
            status: DeploymentStatus::from_i16(r.get("status")),
            rollout_pct: r.get::<i16, _>("rollout_pct") as u8,
            created_at: r.get("created_at"),
            deployed_at: r.get("deployed_at"),
            activated_at: r.get("activated_at"),
        }
    }
}

const MODEL_COLUMNS: &str = r#"
    major, minor, patch, base_model, storage_path, avg_score, avg_outcome,
    trajectory_count, window_count, status, rollout_pct, created_at,
    deployed_at, activated_at
"#;

#[async_trait]
impl ModelStore for ModelRepository {
    async fn insert_model(&self, model: &TrainedModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trained_models (
                major, minor, patch, base_model, storage_path, avg_score,
                avg_outcome, trajectory_count, window_count, status,
                rollout_pct, created_at, deployed_at, activated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(model.version.major as i32)
        .bind(model.version.minor as i32)
        .bind(model.version.patch as i32)
        .bind(&model.base_model)
        .bind(&model.storage_path)
        .bind(model.metrics.avg_score)
        .bind(model.metrics.avg_outcome)
        .bind(model.metrics.trajectory_count as i64)
        .bind(model.metrics.window_count as i64)
        .bind(model.status.as_i16())
        .bind(model.rollout_pct as i16)
        .bind(model.created_at)
        .bind(model.deployed_at)
        .bind(model.activated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_model(&self, model: &TrainedModel) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trained_models SET
                status = $4,
                rollout_pct = $5,
                deployed_at = $6,
                activated_at = $7,
                avg_score = $8,
                avg_outcome = $9
            WHERE major = $1 AND minor = $2 AND patch = $3
            "#,
        )
        .bind(model.version.major as i32)
        .bind(model.version.minor as i32)
        .bind(model.version.patch as i32)
        .bind(model.status.as_i16())
        .bind(model.rollout_pct as i16)
        .bind(model.deployed_at)
        .bind(model.activated_at)
        .bind(model.metrics.avg_score)
        .bind(model.metrics.avg_outcome)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_model(&self, version: ModelVersion) -> Result<Option<TrainedModel>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {MODEL_COLUMNS} FROM trained_models
            WHERE major = $1 AND minor = $2 AND patch = $3
            "#
        ))
        .bind(version.major as i32)
        .bind(version.minor as i32)
        .bind(version.patch as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_model(&r)))
    }

    async fn latest_version(&self) -> Result<Option<ModelVersion>> {
        let row = sqlx::query(
            r#"
            SELECT major, minor, patch FROM trained_models
            ORDER BY major DESC, minor DESC, patch DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            ModelVersion::new(
                r.get::<i32, _>("major") as u32,
                r.get::<i32, _>("minor") as u32,
                r.get::<i32, _>("patch") as u32,
            )
        }))
    }

    async fn active(&self) -> Result<Option<TrainedModel>> {
        let row = sqlx::query(&format!(
            "SELECT {MODEL_COLUMNS} FROM trained_models WHERE status = 2 LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_model(&r)))
    }

    async fn previous_active(&self) -> Result<Option<TrainedModel>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {MODEL_COLUMNS} FROM trained_models
            WHERE status NOT IN (2, 3) AND activated_at IS NOT NULL
            ORDER BY activated_at DESC
            LIMIT 1
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_model(&r)))
    }

    async fn list(&self) -> Result<Vec<TrainedModel>> {
        let rows = sqlx::query(&format!(
            "SELECT {MODEL_COLUMNS} FROM trained_models ORDER BY major, minor, patch"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_model).collect())
    }
}
