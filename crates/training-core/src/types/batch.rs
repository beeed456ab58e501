//! Training batch: one submitted, trackable training job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Integer encoding for storage.
    pub fn as_i16(&self) -> i16 {
        match self {
            BatchStatus::Queued => 0,
            BatchStatus::Running => 1,
            BatchStatus::Completed => 2,
            BatchStatus::Failed => 3,
        }
    }

    pub fn from_i16(v: i16) -> Self {
        match v {
            0 => BatchStatus::Queued,
            1 => BatchStatus::Running,
            2 => BatchStatus::Completed,
            _ => BatchStatus::Failed,
        }
    }
}

/// One submission package sent to the external training engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingBatch {
    pub id: Uuid,
    /// Job handle returned by the engine on acceptance.
    pub job_id: Option<String>,
    pub base_model: String,
    pub hyperparameters: Value,
    /// Windows whose scored cohorts went into this batch.
    pub window_ids: Vec<String>,
    /// Every trajectory consumed by this batch.
    pub trajectory_ids: Vec<Uuid>,
    pub status: BatchStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub checkpoint_ref: Option<String>,
    pub failure_reason: Option<String>,
}

impl TrainingBatch {
    pub fn new(base_model: String, hyperparameters: Value, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: None,
            base_model,
            hyperparameters,
            window_ids: Vec::new(),
            trajectory_ids: Vec::new(),
            status: BatchStatus::Queued,
            submitted_at,
            completed_at: None,
            checkpoint_ref: None,
            failure_reason: None,
        }
    }
}
