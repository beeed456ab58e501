//! Cohort-relative scoring results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One trajectory's relative score within its cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTrajectory {
    pub trajectory_id: Uuid,
    pub agent_id: String,
    /// Cohort-relative score in `[0, 1]`. Only meaningful within the cohort
    /// that produced it; never compare scores across windows.
    pub score: f64,
    pub justification: String,
}

/// The judge's output for one complete cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredGroup {
    pub window_id: String,
    pub entries: Vec<ScoredTrajectory>,
}

impl ScoredGroup {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mean score across the cohort.
    pub fn avg_score(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().map(|e| e.score).sum::<f64>() / self.entries.len() as f64
    }
}
