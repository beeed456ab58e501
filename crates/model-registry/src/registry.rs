//! Monotonic version assignment for trained checkpoints.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use training_core::store::ModelStore;
use training_core::types::{DeploymentStatus, ModelMetrics, ModelVersion, TrainedModel, VersionBump};
use training_core::window::Clock;
use training_core::Result;

/// Registers completed checkpoints as versioned models.
///
/// Version assignment is serialized internally, so concurrent registrations
/// always get distinct, strictly increasing versions.
pub struct ModelRegistry {
    store: Arc<dyn ModelStore>,
    artifacts: Arc<dyn crate::ArtifactStore>,
    clock: Arc<dyn Clock>,
    version_lock: Mutex<()>,
}

impl ModelRegistry {
    pub fn new(
        store: Arc<dyn ModelStore>,
        artifacts: Arc<dyn crate::ArtifactStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            artifacts,
            clock,
            version_lock: Mutex::new(()),
        }
    }

    /// Register a checkpoint as the next model version. New models start
    /// `Pending` with zero rollout; deployment is a separate step.
    pub async fn register(
        &self,
        bump: VersionBump,
        base_model: String,
        checkpoint_ref: String,
        metrics: ModelMetrics,
    ) -> Result<TrainedModel> {
        let _guard = self.version_lock.lock().await;

        let version = match self.store.latest_version().await? {
            Some(latest) => latest.bumped(bump),
            None => ModelVersion::new(1, 0, 0),
        };

        let storage_path = self.artifacts.store(version, &checkpoint_ref).await?;

        let model = TrainedModel {
            version,
            base_model,
            storage_path,
            metrics,
            status: DeploymentStatus::Pending,
            rollout_pct: 0,
            created_at: self.clock.now(),
            deployed_at: None,
            activated_at: None,
        };
        self.store.insert_model(&model).await?;

        info!(
            version = %version,
            checkpoint_ref = %checkpoint_ref,
            avg_score = metrics.avg_score,
            "Registered trained model"
        );

        Ok(model)
    }
}
