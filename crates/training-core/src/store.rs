//! Store traits at the persistence seam.
//!
//! Every aggregate (trajectories, window outcomes, training batches, trained
//! models) has a trait here with a PostgreSQL implementation in [`crate::db`]
//! and an in-memory implementation in [`memory`] used by tests and dry runs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{GroundTruth, TrainedModel, TrainingBatch, Trajectory, WindowStats};
use crate::types::{BatchStatus, ModelVersion};
use crate::Result;

/// Durable trajectory storage, queryable by window and by window + agent.
#[async_trait]
pub trait TrajectoryStore: Send + Sync {
    /// Persist a full trajectory in one write.
    async fn insert(&self, trajectory: &Trajectory) -> Result<()>;

    /// Window ids within the lookback that have at least `min_agents`
    /// distinct agents. The still-open current window (relative to `now`) is
    /// never returned; a window only closes for scoring once its hour has
    /// fully elapsed.
    async fn eligible_windows(
        &self,
        now: DateTime<Utc>,
        lookback_hours: i64,
        min_agents: i64,
    ) -> Result<Vec<String>>;

    /// All trajectories for a window, one entry per trajectory. An agent with
    /// several sessions in the window contributes all of them.
    async fn for_window(&self, window_id: &str) -> Result<Vec<Trajectory>>;

    /// Trajectories for one agent within a window.
    async fn for_window_agent(&self, window_id: &str, agent_id: &str) -> Result<Vec<Trajectory>>;

    /// Aggregate statistics for a window, if it has any trajectories.
    async fn window_stats(&self, window_id: &str) -> Result<Option<WindowStats>>;

    /// Count of trajectories not yet consumed by training.
    async fn count_unused(&self) -> Result<u64>;

    /// Up to `limit` unused trajectories for data-quality sampling.
    async fn sample_unused(&self, limit: usize) -> Result<Vec<Trajectory>>;

    /// Flag trajectories as consumed by training. Idempotent: flagging an
    /// already-used trajectory is a no-op.
    async fn mark_used(&self, ids: &[Uuid]) -> Result<()>;
}

/// Read access to observed window outcomes (ground truth).
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn ground_truth(&self, window_id: &str) -> Result<Option<GroundTruth>>;
}

/// Persistence for training batches.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn insert_batch(&self, batch: &TrainingBatch) -> Result<()>;

    async fn update_batch(&self, batch: &TrainingBatch) -> Result<()>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<TrainingBatch>>;

    /// The open (queued or running) batch, if any. At most one batch is
    /// in flight at a time.
    async fn find_open(&self) -> Result<Option<TrainingBatch>>;

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<TrainingBatch>>;
}

/// Persistence for trained model versions.
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn insert_model(&self, model: &TrainedModel) -> Result<()>;

    async fn update_model(&self, model: &TrainedModel) -> Result<()>;

    async fn get_model(&self, version: ModelVersion) -> Result<Option<TrainedModel>>;

    /// Highest registered version, regardless of status.
    async fn latest_version(&self) -> Result<Option<ModelVersion>>;

    /// The single active model, if one is deployed.
    async fn active(&self) -> Result<Option<TrainedModel>>;

    /// The most recently activated non-active, non-rolled-back model; the
    /// restore target for rollback.
    async fn previous_active(&self) -> Result<Option<TrainedModel>>;

    async fn list(&self) -> Result<Vec<TrainedModel>>;
}
