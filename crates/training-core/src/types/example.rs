//! Training-ready message sequences reconstructed from trajectories.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ground_truth::GroundTruth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Metadata carried alongside a converted trajectory.
///
/// Ground truth lives here and in the system context only; it is never
/// blended into the step rewards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleMetadata {
    pub trajectory_id: Uuid,
    pub agent_id: String,
    pub window_id: String,
    /// Position of this trajectory within its scenario group.
    pub group_index: usize,
    pub final_outcome: Decimal,
    pub step_count: usize,
    pub recorded_at: DateTime<Utc>,
    pub ground_truth: Option<GroundTruth>,
}

/// One training-ready example: an ordered message sequence plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub messages: Vec<Message>,
    pub metadata: ExampleMetadata,
}
