//! Versioned trained-model artifacts and their deployment lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Semantic version of a trained model. Monotonically increasing; numbers are
/// never reused or decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The version produced by applying a bump to this one.
    pub fn bumped(&self, bump: VersionBump) -> Self {
        match bump {
            VersionBump::Major => Self::new(self.major + 1, 0, 0),
            VersionBump::Minor => Self::new(self.major, self.minor + 1, 0),
            VersionBump::Patch => Self::new(self.major, self.minor, self.patch + 1),
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ModelVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.strip_prefix('v').unwrap_or(s);
        let mut parts = trimmed.split('.');
        let parse = |part: Option<&str>| -> Result<u32> {
            part.and_then(|p| p.parse().ok()).ok_or(Error::Registry {
                message: format!("invalid model version: {s}"),
            })
        };
        let major = parse(parts.next())?;
        let minor = parse(parts.next())?;
        let patch = parse(parts.next())?;
        if parts.next().is_some() {
            return Err(Error::Registry {
                message: format!("invalid model version: {s}"),
            });
        }
        Ok(Self::new(major, minor, patch))
    }
}

/// Which version component to bump at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionBump {
    Major,
    Minor,
    Patch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Staged,
    Active,
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_i16(&self) -> i16 {
        match self {
            DeploymentStatus::Pending => 0,
            DeploymentStatus::Staged => 1,
            DeploymentStatus::Active => 2,
            DeploymentStatus::RolledBack => 3,
        }
    }

    pub fn from_i16(v: i16) -> Self {
        match v {
            0 => DeploymentStatus::Pending,
            1 => DeploymentStatus::Staged,
            2 => DeploymentStatus::Active,
            _ => DeploymentStatus::RolledBack,
        }
    }
}

/// Evaluation metrics attached to a trained model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Mean cohort-relative judge score over the training data.
    pub avg_score: f64,
    /// Mean final outcome of the consumed trajectories.
    pub avg_outcome: f64,
    pub trajectory_count: u64,
    pub window_count: u64,
}

/// A versioned model artifact produced by a training batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub version: ModelVersion,
    pub base_model: String,
    /// Version-qualified location of the weights or adapter.
    pub storage_path: String,
    pub metrics: ModelMetrics,
    pub status: DeploymentStatus,
    /// Fraction of agent traffic directed at this version while staged.
    pub rollout_pct: u8,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    /// When this version last held `Active` status. Kept through demotion so
    /// rollback can find the previous active version.
    pub activated_at: Option<DateTime<Utc>>,
}
