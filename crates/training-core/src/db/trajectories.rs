//! Database operations for trajectories.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::store::TrajectoryStore;
use crate::types::{Step, Trajectory, WindowStats};
use crate::window;
use crate::Result;

/// Repository for trajectory data.
///
/// Steps are stored as one JSON column per trajectory: a trajectory is
/// written exactly once, at session end, which keeps write amplification at
/// one durable write per session regardless of step count.
pub struct TrajectoryRepository {
    pool: PgPool,
}

impl TrajectoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_trajectory(r: &sqlx::postgres::PgRow) -> Result<Trajectory> {
        let steps: Vec<Step> = serde_json::from_str(&r.get::<String, _>("steps_json"))?;

        Ok(Trajectory {
            id: r.get("id"),
            agent_id: r.get("agent_id"),
            window_id: r.get("window_id"),
            steps,
            final_outcome: r.get("final_outcome"),
            started_at: r.get("started_at"),
            ended_at: r.get("ended_at"),
            used_in_training: r.get("used_in_training"),
            training_eligible: r.get("training_eligible"),
        })
    }
}

const TRAJECTORY_COLUMNS: &str = r#"
    id, agent_id, window_id, steps_json, final_outcome,
    started_at, ended_at, used_in_training, training_eligible
"#;

#[async_trait]
impl TrajectoryStore for TrajectoryRepository {
    async fn insert(&self, trajectory: &Trajectory) -> Result<()> {
        let steps_json = serde_json::to_string(&trajectory.steps)?;

        sqlx::query(
            r#"
            INSERT INTO trajectories (
                id, agent_id, window_id, steps_json, final_outcome,
                started_at, ended_at, used_in_training, training_eligible
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(trajectory.id)
        .bind(&trajectory.agent_id)
        .bind(&trajectory.window_id)
        .bind(steps_json)
        .bind(trajectory.final_outcome)
        .bind(trajectory.started_at)
        .bind(trajectory.ended_at)
        .bind(trajectory.used_in_training)
        .bind(trajectory.training_eligible)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn eligible_windows(
        &self,
        now: DateTime<Utc>,
        lookback_hours: i64,
        min_agents: i64,
    ) -> Result<Vec<String>> {
        let cutoff = now - Duration::hours(lookback_hours);
        // Window ids sort lexicographically in chronological order, so a
        // plain string comparison excludes the still-open current window.
        let current_window = window::window_id(now);

        let rows = sqlx::query(
            r#"
            SELECT window_id
            FROM trajectories
            WHERE ended_at > $1 AND window_id < $2
            GROUP BY window_id
            HAVING COUNT(DISTINCT agent_id) >= $3
            ORDER BY window_id DESC
            "#,
        )
        .bind(cutoff)
        .bind(current_window)
        .bind(min_agents)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("window_id")).collect())
    }

    async fn for_window(&self, window_id: &str) -> Result<Vec<Trajectory>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRAJECTORY_COLUMNS} FROM trajectories WHERE window_id = $1 ORDER BY ended_at"
        ))
        .bind(window_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trajectory).collect()
    }

    async fn for_window_agent(&self, window_id: &str, agent_id: &str) -> Result<Vec<Trajectory>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRAJECTORY_COLUMNS} FROM trajectories
            WHERE window_id = $1 AND agent_id = $2
            ORDER BY ended_at
            "#
        ))
        .bind(window_id)
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trajectory).collect()
    }

    async fn window_stats(&self, window_id: &str) -> Result<Option<WindowStats>> {
        let row = sqlx::query(
            r#"
            SELECT
                window_id,
                COUNT(DISTINCT agent_id) as agent_count,
                COUNT(*) as trajectory_count,
                COALESCE(AVG(final_outcome), 0) as avg_outcome,
                COALESCE(MIN(final_outcome), 0) as min_outcome,
                COALESCE(MAX(final_outcome), 0) as max_outcome,
                MIN(started_at) as started_at,
                MAX(ended_at) as ended_at
            FROM trajectories
            WHERE window_id = $1
            GROUP BY window_id
            "#,
        )
        .bind(window_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        // Step counts live inside the JSON column; summing them needs the
        // full rows anyway, so reuse the window query.
        let members = self.for_window(window_id).await?;

        Ok(Some(WindowStats {
            window_id: r.get("window_id"),
            agent_count: r.get::<Option<i64>, _>("agent_count").unwrap_or(0) as u64,
            trajectory_count: r.get::<Option<i64>, _>("trajectory_count").unwrap_or(0) as u64,
            total_steps: members.iter().map(|t| t.steps.len() as u64).sum(),
            avg_outcome: r
                .get::<Option<Decimal>, _>("avg_outcome")
                .unwrap_or_default(),
            min_outcome: r
                .get::<Option<Decimal>, _>("min_outcome")
                .unwrap_or_default(),
            max_outcome: r
                .get::<Option<Decimal>, _>("max_outcome")
                .unwrap_or_default(),
            started_at: r.get("started_at"),
            ended_at: r.get("ended_at"),
        }))
    }

    async fn count_unused(&self) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as unused FROM trajectories WHERE used_in_training = FALSE",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<Option<i64>, _>("unused").unwrap_or(0) as u64)
    }

    async fn sample_unused(&self, limit: usize) -> Result<Vec<Trajectory>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRAJECTORY_COLUMNS} FROM trajectories
            WHERE used_in_training = FALSE
            ORDER BY ended_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trajectory).collect()
    }

    async fn mark_used(&self, ids: &[Uuid]) -> Result<()> {
        sqlx::query("UPDATE trajectories SET used_in_training = TRUE WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
