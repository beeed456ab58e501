//! Staged deployment lifecycle with rollback.
//!
//! Lifecycle: `Pending -> Staged -> Active -> RolledBack`. At most one model
//! is active; promotion demotes the previous active model back to `Staged`
//! without clearing its activation timestamp, which is how rollback finds
//! its restore target.

use std::sync::Arc;

use tracing::{info, warn};

use training_core::config::DeploymentConfig;
use training_core::store::ModelStore;
use training_core::types::{DeploymentStatus, ModelMetrics, ModelVersion, TrainedModel};
use training_core::window::Clock;
use training_core::{Error, Result};

pub struct DeploymentController {
    store: Arc<dyn ModelStore>,
    clock: Arc<dyn Clock>,
    config: DeploymentConfig,
}

impl DeploymentController {
    pub fn new(store: Arc<dyn ModelStore>, clock: Arc<dyn Clock>, config: DeploymentConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Stage a model on a fraction of agent traffic.
    ///
    /// `rollout_pct` defaults to the configured initial fraction. Staging
    /// above the configured ceiling is refused; full rollout only happens
    /// through [`promote`](Self::promote).
    pub async fn deploy(
        &self,
        version: ModelVersion,
        rollout_pct: Option<u8>,
    ) -> Result<TrainedModel> {
        let mut model = self.get(version).await?;

        if !matches!(
            model.status,
            DeploymentStatus::Pending | DeploymentStatus::Staged
        ) {
            return Err(Error::PolicyViolation {
                message: format!(
                    "cannot stage {version} from status {:?}",
                    model.status
                ),
            });
        }

        let pct = rollout_pct.unwrap_or(self.config.initial_rollout_pct);
        if pct == 0 || pct > self.config.max_stage_rollout_pct {
            return Err(Error::PolicyViolation {
                message: format!(
                    "rollout {pct}% outside the staging range 1..={}%",
                    self.config.max_stage_rollout_pct
                ),
            });
        }

        model.status = DeploymentStatus::Staged;
        model.rollout_pct = pct;
        model.deployed_at = Some(self.clock.now());
        self.store.update_model(&model).await?;

        info!(version = %version, rollout_pct = pct, "Staged model");
        Ok(model)
    }

    /// Promote a staged model to active on all traffic. The previous active
    /// model is demoted to `Staged` with zero rollout and keeps its
    /// activation timestamp.
    pub async fn promote(&self, version: ModelVersion) -> Result<TrainedModel> {
        let mut model = self.get(version).await?;

        if model.status != DeploymentStatus::Staged {
            return Err(Error::PolicyViolation {
                message: format!(
                    "cannot promote {version} from status {:?}, stage it first",
                    model.status
                ),
            });
        }

        if let Some(mut active) = self.store.active().await? {
            active.status = DeploymentStatus::Staged;
            active.rollout_pct = 0;
            self.store.update_model(&active).await?;
            info!(version = %active.version, "Demoted previously active model");
        }

        model.status = DeploymentStatus::Active;
        model.rollout_pct = 100;
        model.activated_at = Some(self.clock.now());
        self.store.update_model(&model).await?;

        info!(version = %version, "Promoted model to active");
        Ok(model)
    }

    /// Roll back the active model and restore the most recently active
    /// predecessor, if one exists. A rolled-back version can never be
    /// deployed again.
    pub async fn rollback(&self, reason: &str) -> Result<Option<TrainedModel>> {
        let Some(mut active) = self.store.active().await? else {
            return Err(Error::PolicyViolation {
                message: "no active model to roll back".to_string(),
            });
        };

        active.status = DeploymentStatus::RolledBack;
        active.rollout_pct = 0;
        self.store.update_model(&active).await?;
        warn!(version = %active.version, reason = %reason, "Rolled back active model");

        let Some(mut previous) = self.store.previous_active().await? else {
            warn!("No previous active model to restore");
            return Ok(None);
        };

        previous.status = DeploymentStatus::Active;
        previous.rollout_pct = 100;
        previous.activated_at = Some(self.clock.now());
        self.store.update_model(&previous).await?;

        info!(version = %previous.version, "Restored previous active model");
        Ok(Some(previous))
    }

    /// Whether a candidate's training-time score regresses past the
    /// configured tolerance against a baseline.
    pub fn is_regression(&self, candidate: &ModelMetrics, baseline: &ModelMetrics) -> bool {
        baseline.avg_score > 0.0
            && candidate.avg_score < baseline.avg_score * (1.0 - self.config.regression_tolerance)
    }

    async fn get(&self, version: ModelVersion) -> Result<TrainedModel> {
        self.store
            .get_model(version)
            .await?
            .ok_or_else(|| Error::Registry {
                message: format!("unknown model version {version}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};
    use training_core::store::memory::MemoryStore;

    /// Clock that advances one second per reading, so activation timestamps
    /// are strictly ordered.
    struct TickClock(AtomicI64);

    impl Clock for TickClock {
        fn now(&self) -> DateTime<Utc> {
            let tick = self.0.fetch_add(1, Ordering::SeqCst);
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(tick)
        }
    }

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            initial_rollout_pct: 10,
            max_stage_rollout_pct: 50,
            regression_tolerance: 0.05,
            artifact_dir: "/tmp/model-artifacts-test".to_string(),
        }
    }

    async fn seed_pending(store: &MemoryStore, version: ModelVersion) {
        let model = TrainedModel {
            version,
            base_model: "base".to_string(),
            storage_path: format!("/models/{version}"),
            metrics: ModelMetrics::default(),
            status: DeploymentStatus::Pending,
            rollout_pct: 0,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap(),
            deployed_at: None,
            activated_at: None,
        };
        store.insert_model(&model).await.unwrap();
    }

    fn controller(store: Arc<MemoryStore>) -> DeploymentController {
        DeploymentController::new(store, Arc::new(TickClock(AtomicI64::new(0))), config())
    }

    #[tokio::test]
    async fn staging_applies_the_default_rollout() {
        let store = Arc::new(MemoryStore::new());
        let v = ModelVersion::new(1, 0, 0);
        seed_pending(&store, v).await;
        let controller = controller(store);

        let staged = controller.deploy(v, None).await.unwrap();
        assert_eq!(staged.status, DeploymentStatus::Staged);
        assert_eq!(staged.rollout_pct, 10);
        assert!(staged.deployed_at.is_some());
    }

    #[tokio::test]
    async fn staging_above_the_ceiling_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let v = ModelVersion::new(1, 0, 0);
        seed_pending(&store, v).await;
        let controller = controller(store);

        let err = controller.deploy(v, Some(80)).await.unwrap_err();
        assert!(matches!(err, Error::PolicyViolation { .. }));
    }

    #[tokio::test]
    async fn promotion_demotes_the_previous_active_model() {
        let store = Arc::new(MemoryStore::new());
        let old = ModelVersion::new(1, 0, 5);
        let new = ModelVersion::new(1, 1, 0);
        seed_pending(&store, old).await;
        seed_pending(&store, new).await;
        let controller = controller(store.clone());

        controller.deploy(old, None).await.unwrap();
        controller.promote(old).await.unwrap();
        controller.deploy(new, None).await.unwrap();
        controller.promote(new).await.unwrap();

        let demoted = store.get_model(old).await.unwrap().unwrap();
        assert_eq!(demoted.status, DeploymentStatus::Staged);
        assert_eq!(demoted.rollout_pct, 0);
        // Activation history survives demotion.
        assert!(demoted.activated_at.is_some());

        let active = store.active().await.unwrap().unwrap();
        assert_eq!(active.version, new);
        assert_eq!(active.rollout_pct, 100);
    }

    #[tokio::test]
    async fn promoting_an_undeployed_model_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let v = ModelVersion::new(1, 0, 0);
        seed_pending(&store, v).await;
        let controller = controller(store);

        let err = controller.promote(v).await.unwrap_err();
        assert!(matches!(err, Error::PolicyViolation { .. }));
    }

    #[tokio::test]
    async fn rollback_restores_the_previously_active_version() {
        let store = Arc::new(MemoryStore::new());
        let old = ModelVersion::new(1, 0, 5);
        let new = ModelVersion::new(1, 1, 0);
        seed_pending(&store, old).await;
        seed_pending(&store, new).await;
        let controller = controller(store.clone());

        controller.deploy(old, None).await.unwrap();
        controller.promote(old).await.unwrap();
        controller.deploy(new, None).await.unwrap();
        controller.promote(new).await.unwrap();

        let restored = controller.rollback("score regression").await.unwrap().unwrap();
        assert_eq!(restored.version, old);

        let active = store.active().await.unwrap().unwrap();
        assert_eq!(active.version, old);

        let rolled_back = store.get_model(new).await.unwrap().unwrap();
        assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);

        // A rolled-back version cannot re-enter the lifecycle.
        let err = controller.deploy(new, None).await.unwrap_err();
        assert!(matches!(err, Error::PolicyViolation { .. }));
    }

    #[tokio::test]
    async fn rollback_without_an_active_model_is_an_error() {
        let controller = controller(Arc::new(MemoryStore::new()));
        assert!(controller.rollback("nothing active").await.is_err());
    }

    #[test]
    fn regression_check_uses_the_tolerance() {
        let controller = controller(Arc::new(MemoryStore::new()));
        let baseline = ModelMetrics {
            avg_score: 0.60,
            ..Default::default()
        };
        let slightly_worse = ModelMetrics {
            avg_score: 0.58,
            ..Default::default()
        };
        let much_worse = ModelMetrics {
            avg_score: 0.50,
            ..Default::default()
        };

        assert!(!controller.is_regression(&slightly_worse, &baseline));
        assert!(controller.is_regression(&much_worse, &baseline));
    }
}
