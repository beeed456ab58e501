//! One training cycle end to end, plus the continuous loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use model_registry::{DeploymentController, ModelRegistry};
use training_core::store::{BatchStore, ModelStore};
use training_core::types::{BatchStatus, TrainedModel, TrainingBatch, VersionBump};
use training_core::{Error, Result};
use training_orchestrator::{batch_metrics, TrainingOrchestrator};

/// How a training cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Not enough fresh cohort data, nothing submitted.
    NotReady,
    /// The engine rejected the submission; data stays unused.
    FailedToSubmit,
    /// The engine failed the job; data stays unused.
    TrainingFailed,
    /// A new version was trained but held at stage because its score
    /// regresses from the active model.
    Staged,
    /// A new version was trained, staged, and promoted to active.
    Deployed,
    /// Observed scores under the active model regressed past tolerance; the
    /// active model was rolled back and its predecessor restored.
    RolledBack,
}

/// Human-readable record of one cycle.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub detail: String,
}

/// Drives the full pipeline on a fixed cadence: submit when ready, wait for
/// the engine, register and deploy the result.
pub struct AutomationScheduler {
    orchestrator: TrainingOrchestrator,
    registry: ModelRegistry,
    deployer: DeploymentController,
    batches: Arc<dyn BatchStore>,
    models: Arc<dyn ModelStore>,
    interval: Duration,
}

impl AutomationScheduler {
    pub fn new(
        orchestrator: TrainingOrchestrator,
        registry: ModelRegistry,
        deployer: DeploymentController,
        batches: Arc<dyn BatchStore>,
        models: Arc<dyn ModelStore>,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            deployer,
            batches,
            models,
            interval,
        }
    }

    /// Run exactly one cycle.
    ///
    /// A batch left in flight by an earlier run (e.g. across a restart) is
    /// resumed instead of submitting a new one.
    pub async fn run_once(&self) -> Result<RunReport> {
        let batch = match self.batches.find_open().await? {
            Some(open) => {
                info!(batch_id = %open.id, "Resuming open training batch");
                open
            }
            None => match self.orchestrator.submit_if_ready().await {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    return Ok(RunReport {
                        outcome: RunOutcome::NotReady,
                        detail: "no batch submitted".to_string(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Batch submission failed");
                    return Ok(RunReport {
                        outcome: RunOutcome::FailedToSubmit,
                        detail: e.to_string(),
                    });
                }
            },
        };

        let done = self.orchestrator.monitor(batch).await?;
        self.finish_cycle(done).await
    }

    /// Train one named window immediately, outside the readiness gate.
    ///
    /// Administrative trigger; the normal one-open-batch rule still holds.
    pub async fn force_window(&self, window_id: &str) -> Result<RunReport> {
        let Some(batch) = self.orchestrator.submit_window(window_id).await? else {
            return Ok(RunReport {
                outcome: RunOutcome::NotReady,
                detail: "a batch is already in flight".to_string(),
            });
        };

        let done = self.orchestrator.monitor(batch).await?;
        self.finish_cycle(done).await
    }

    async fn finish_cycle(&self, done: TrainingBatch) -> Result<RunReport> {
        if done.status == BatchStatus::Failed {
            return Ok(RunReport {
                outcome: RunOutcome::TrainingFailed,
                detail: done
                    .failure_reason
                    .unwrap_or_else(|| "no reason reported".to_string()),
            });
        }

        let checkpoint = done.checkpoint_ref.clone().ok_or_else(|| Error::Engine {
            message: format!("batch {} completed without a checkpoint", done.id),
        })?;
        let metrics = batch_metrics(&done);

        // Baseline before registration, so the candidate never compares
        // against itself.
        let baseline = self.models.active().await?;

        let model = self
            .registry
            .register(VersionBump::Minor, done.base_model.clone(), checkpoint, metrics)
            .await?;
        self.deployer.deploy(model.version, None).await?;

        if let Some(active) = baseline {
            // The scores observed this cycle were produced by agents running
            // the active model. A drop past tolerance from the predecessor's
            // level means the last promotion made things worse in the wild;
            // that triggers a rollback without waiting for an operator.
            if let Some(previous) = self.models.previous_active().await? {
                if self.deployer.is_regression(&metrics, &previous.metrics) {
                    warn!(
                        version = %active.version,
                        observed_score = metrics.avg_score,
                        predecessor_score = previous.metrics.avg_score,
                        "Observed scores regress from the predecessor, rolling back"
                    );
                    let reason = format!(
                        "observed score {:.3} regresses from predecessor {:.3}",
                        metrics.avg_score, previous.metrics.avg_score
                    );
                    let restored = self.deployer.rollback(&reason).await?;
                    let detail = match restored {
                        Some(m) => format!(
                            "{} rolled back, {} restored; {} held at stage",
                            active.version, m.version, model.version
                        ),
                        None => format!(
                            "{} rolled back with no predecessor to restore; {} held at stage",
                            active.version, model.version
                        ),
                    };
                    return Ok(RunReport {
                        outcome: RunOutcome::RolledBack,
                        detail,
                    });
                }
            }

            if self.deployer.is_regression(&metrics, &active.metrics) {
                warn!(
                    version = %model.version,
                    candidate_score = metrics.avg_score,
                    active_score = active.metrics.avg_score,
                    "Holding new model at stage, score regresses from active"
                );
                return Ok(RunReport {
                    outcome: RunOutcome::Staged,
                    detail: format!(
                        "{} held at stage: score {:.3} regresses from active {:.3}",
                        model.version, metrics.avg_score, active.metrics.avg_score
                    ),
                });
            }
        }

        self.deployer.promote(model.version).await?;
        Ok(RunReport {
            outcome: RunOutcome::Deployed,
            detail: format!("{} promoted to active", model.version),
        })
    }

    /// Run cycles on the configured cadence until the process stops.
    pub async fn run_forever(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) => {
                    info!(
                        outcome = ?report.outcome,
                        detail = %report.detail,
                        "Training cycle finished"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Training cycle failed");
                }
            }
        }
    }

    /// Roll the active model back to its predecessor.
    pub async fn rollback(&self, reason: &str) -> Result<Option<TrainedModel>> {
        self.deployer.rollback(reason).await
    }
}
