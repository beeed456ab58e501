//! Readiness gating, batch assembly, and job monitoring.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cohort_scorer::CohortScorer;
use data_bridge::{dropout_rate, CohortGrouper, ContextConverter};
use training_core::config::{EngineConfig, TrainingConfig};
use training_core::store::{BatchStore, OutcomeStore, TrajectoryStore};
use training_core::types::{BatchStatus, ModelMetrics, TrainingBatch, Trajectory};
use training_core::window::Clock;
use training_core::{Error, Result};

use crate::engine::{JobStatus, SubmissionGroup, TrainingEngine, TrainingSubmission};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub training: TrainingConfig,
    pub engine: EngineConfig,
    /// Delay between job status polls.
    pub poll_interval: Duration,
    /// Ceiling on total wait for one job; past it the batch is failed.
    pub max_poll: Duration,
    /// Consecutive poll errors tolerated before the batch is failed. A job
    /// the engine no longer knows about must not leave the batch open.
    pub max_poll_failures: usize,
    /// Cap on cohorts being converted and scored at once.
    pub max_concurrent_scoring: usize,
}

/// Outcome of the readiness check.
#[derive(Debug, Clone)]
pub enum Readiness {
    Ready { windows: Vec<String> },
    NotReady { reason: String },
}

/// Drives one training cycle: readiness, assembly, submission, monitoring.
///
/// Submission is serialized internally; concurrent callers cannot create two
/// open batches.
pub struct TrainingOrchestrator {
    trajectories: Arc<dyn TrajectoryStore>,
    outcomes: Arc<dyn OutcomeStore>,
    batches: Arc<dyn BatchStore>,
    engine: Arc<dyn TrainingEngine>,
    grouper: CohortGrouper,
    converter: ContextConverter,
    scorer: CohortScorer,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    submit_lock: Mutex<()>,
}

impl TrainingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trajectories: Arc<dyn TrajectoryStore>,
        outcomes: Arc<dyn OutcomeStore>,
        batches: Arc<dyn BatchStore>,
        engine: Arc<dyn TrainingEngine>,
        grouper: CohortGrouper,
        converter: ContextConverter,
        scorer: CohortScorer,
        clock: Arc<dyn Clock>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            trajectories,
            outcomes,
            batches,
            engine,
            grouper,
            converter,
            scorer,
            clock,
            config,
            submit_lock: Mutex::new(()),
        }
    }

    /// Whether enough fresh cohort data has accumulated for a training run.
    ///
    /// Requires a minimum count of unused trajectories, at least one eligible
    /// window, and a clean data-quality sample.
    pub async fn check_readiness(&self) -> Result<Readiness> {
        let training = &self.config.training;

        let unused = self.trajectories.count_unused().await?;
        if unused < training.min_trajectories {
            return Ok(Readiness::NotReady {
                reason: format!(
                    "{unused} unused trajectories, need {}",
                    training.min_trajectories
                ),
            });
        }

        let windows = self
            .grouper
            .eligible_windows(training.lookback_hours, training.min_agents_per_window)
            .await?;
        if windows.len() < training.min_eligible_windows {
            return Ok(Readiness::NotReady {
                reason: format!(
                    "{} eligible windows, need {}",
                    windows.len(),
                    training.min_eligible_windows
                ),
            });
        }

        let sample = self
            .trajectories
            .sample_unused(training.quality_sample_size)
            .await?;
        if let Some(bad) = sample.iter().find(|t| t.completed_step_count() == 0) {
            return Ok(Readiness::NotReady {
                reason: format!("sampled trajectory {} has no completed steps", bad.id),
            });
        }

        Ok(Readiness::Ready { windows })
    }

    /// Assemble, score, and submit one batch if the pipeline is ready.
    ///
    /// Idempotent while a batch is in flight: an open batch short-circuits to
    /// `Ok(None)`. Trajectories stay unmarked until the job completes.
    pub async fn submit_if_ready(&self) -> Result<Option<TrainingBatch>> {
        let _guard = self.submit_lock.lock().await;

        if let Some(open) = self.batches.find_open().await? {
            info!(batch_id = %open.id, "Training batch already in flight, skipping submission");
            return Ok(None);
        }

        let windows = match self.check_readiness().await? {
            Readiness::Ready { windows } => windows,
            Readiness::NotReady { reason } => {
                info!(reason = %reason, "Not ready for training");
                return Ok(None);
            }
        };

        let mut cohorts: Vec<(String, Vec<Trajectory>)> = Vec::new();
        for window_id in &windows {
            let fresh: Vec<Trajectory> = self
                .grouper
                .window_data(window_id)
                .await?
                .into_iter()
                .filter(|t| t.training_eligible && !t.used_in_training)
                .collect();
            if fresh.len() < self.config.training.min_group_size {
                debug!(
                    window_id = %window_id,
                    fresh = fresh.len(),
                    "Too few fresh trajectories in window, skipping"
                );
                continue;
            }
            cohorts.push((window_id.clone(), fresh));
        }

        let actual: usize = cohorts.iter().map(|(_, c)| c.len()).sum();
        if actual == 0 {
            info!("No windows with fresh cohorts, skipping submission");
            return Ok(None);
        }
        let dropout = dropout_rate(
            actual,
            self.config.training.dropout_target,
            self.config.training.max_dropout,
        );

        let prepared: Vec<(String, Result<SubmissionGroup>)> = stream::iter(cohorts)
            .map(|(window_id, cohort)| self.prepare_group(window_id, cohort, dropout))
            .buffer_unordered(self.config.max_concurrent_scoring.max(1))
            .collect()
            .await;

        let mut groups = Vec::new();
        for (window_id, result) in prepared {
            match result {
                Ok(group) => groups.push(group),
                Err(e) => {
                    warn!(window_id = %window_id, error = %e, "Skipping cohort");
                }
            }
        }
        if groups.is_empty() {
            warn!("Every cohort failed conversion or scoring, skipping submission");
            return Ok(None);
        }

        self.submit_groups(groups).await.map(Some)
    }

    /// Submit one named window's cohort, bypassing the readiness gate.
    ///
    /// Administrative path for training a specific window on demand. The
    /// open-batch guard still applies, and the cohort must meet the minimum
    /// group size; too little fresh data is an error, not a silent no-op.
    pub async fn submit_window(&self, window_id: &str) -> Result<Option<TrainingBatch>> {
        let _guard = self.submit_lock.lock().await;

        if let Some(open) = self.batches.find_open().await? {
            info!(
                batch_id = %open.id,
                window_id = %window_id,
                "Training batch already in flight, skipping forced submission"
            );
            return Ok(None);
        }

        let fresh: Vec<Trajectory> = self
            .grouper
            .window_data(window_id)
            .await?
            .into_iter()
            .filter(|t| t.training_eligible && !t.used_in_training)
            .collect();
        if fresh.len() < self.config.training.min_group_size {
            return Err(Error::DataIntegrity {
                message: format!(
                    "window {window_id} has {} fresh trajectories, need {}",
                    fresh.len(),
                    self.config.training.min_group_size
                ),
            });
        }

        let dropout = dropout_rate(
            fresh.len(),
            self.config.training.dropout_target,
            self.config.training.max_dropout,
        );
        let (_, result) = self.prepare_group(window_id.to_string(), fresh, dropout).await;
        let batch = self.submit_groups(vec![result?]).await?;
        Ok(Some(batch))
    }

    async fn submit_groups(&self, mut groups: Vec<SubmissionGroup>) -> Result<TrainingBatch> {
        groups.sort_by(|a, b| a.window_id.cmp(&b.window_id));

        let metrics = submission_metrics(&groups);
        let hyperparameters = json!({
            "learning_rate": self.config.engine.learning_rate,
            "metrics": metrics,
        });

        let mut batch = TrainingBatch::new(
            self.config.engine.base_model.clone(),
            hyperparameters,
            self.clock.now(),
        );
        batch.window_ids = groups.iter().map(|g| g.window_id.clone()).collect();
        batch.trajectory_ids = groups
            .iter()
            .flat_map(|g| g.examples.iter().map(|e| e.metadata.trajectory_id))
            .collect();

        let submission = TrainingSubmission {
            base_model: batch.base_model.clone(),
            hyperparameters: batch.hyperparameters.clone(),
            groups,
        };
        let job_id = self.engine.submit(&submission).await?;
        batch.job_id = Some(job_id.clone());
        batch.status = BatchStatus::Running;
        self.batches.insert_batch(&batch).await?;

        info!(
            batch_id = %batch.id,
            job_id = %job_id,
            windows = batch.window_ids.len(),
            trajectories = batch.trajectory_ids.len(),
            "Submitted training batch"
        );

        Ok(batch)
    }

    async fn prepare_group(
        &self,
        window_id: String,
        cohort: Vec<Trajectory>,
        dropout: f64,
    ) -> (String, Result<SubmissionGroup>) {
        let result = async {
            let truth = self.outcomes.ground_truth(&window_id).await?;
            let examples = self.converter.convert_group(&cohort, truth.as_ref(), dropout)?;
            let scored = self.scorer.score_cohort(&examples).await?;
            Ok(SubmissionGroup {
                window_id: window_id.clone(),
                examples,
                scores: scored.entries,
            })
        }
        .await;
        (window_id, result)
    }

    /// Poll a submitted batch until it reaches a terminal state.
    ///
    /// Completion marks every consumed trajectory as used; failure, timeout,
    /// and a run of consecutive poll errors all fail the batch and leave the
    /// trajectories available for the next run.
    pub async fn monitor(&self, mut batch: TrainingBatch) -> Result<TrainingBatch> {
        let job_id = batch.job_id.clone().ok_or_else(|| Error::Engine {
            message: format!("batch {} has no job handle to monitor", batch.id),
        })?;

        let mut waited = Duration::ZERO;
        let mut poll_failures: usize = 0;
        loop {
            let status = match self.engine.poll(&job_id).await {
                Ok(status) => {
                    poll_failures = 0;
                    status
                }
                Err(e) => {
                    poll_failures += 1;
                    warn!(
                        batch_id = %batch.id,
                        job_id = %job_id,
                        error = %e,
                        failures = poll_failures,
                        "Polling training job failed"
                    );
                    if poll_failures >= self.config.max_poll_failures.max(1) {
                        batch.status = BatchStatus::Failed;
                        batch.completed_at = Some(self.clock.now());
                        batch.failure_reason =
                            Some(format!("poll failed {poll_failures} times: {e}"));
                        self.batches.update_batch(&batch).await?;
                        return Ok(batch);
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                    waited += self.config.poll_interval;
                    continue;
                }
            };
            match status {
                JobStatus::Running => {
                    if waited >= self.config.max_poll {
                        warn!(
                            batch_id = %batch.id,
                            job_id = %job_id,
                            waited_secs = waited.as_secs(),
                            "Training job exceeded poll ceiling, failing batch"
                        );
                        batch.status = BatchStatus::Failed;
                        batch.completed_at = Some(self.clock.now());
                        batch.failure_reason =
                            Some(format!("timed out after {}s", waited.as_secs()));
                        self.batches.update_batch(&batch).await?;
                        return Ok(batch);
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                    waited += self.config.poll_interval;
                }
                JobStatus::Completed { checkpoint } => {
                    batch.status = BatchStatus::Completed;
                    batch.completed_at = Some(self.clock.now());
                    batch.checkpoint_ref = Some(checkpoint);
                    self.batches.update_batch(&batch).await?;
                    self.trajectories.mark_used(&batch.trajectory_ids).await?;
                    info!(
                        batch_id = %batch.id,
                        job_id = %job_id,
                        trajectories = batch.trajectory_ids.len(),
                        "Training batch completed"
                    );
                    return Ok(batch);
                }
                JobStatus::Failed { reason } => {
                    warn!(
                        batch_id = %batch.id,
                        job_id = %job_id,
                        reason = %reason,
                        "Training batch failed, trajectories stay unused"
                    );
                    batch.status = BatchStatus::Failed;
                    batch.completed_at = Some(self.clock.now());
                    batch.failure_reason = Some(reason);
                    self.batches.update_batch(&batch).await?;
                    return Ok(batch);
                }
            }
        }
    }
}

fn submission_metrics(groups: &[SubmissionGroup]) -> ModelMetrics {
    use rust_decimal::prelude::ToPrimitive;

    let trajectory_count: usize = groups.iter().map(|g| g.examples.len()).sum();
    if trajectory_count == 0 {
        return ModelMetrics::default();
    }
    let score_sum: f64 = groups
        .iter()
        .flat_map(|g| g.scores.iter().map(|s| s.score))
        .sum();
    let outcome_sum: f64 = groups
        .iter()
        .flat_map(|g| g.examples.iter())
        .map(|e| e.metadata.final_outcome.to_f64().unwrap_or(0.0))
        .sum();

    ModelMetrics {
        avg_score: score_sum / trajectory_count as f64,
        avg_outcome: outcome_sum / trajectory_count as f64,
        trajectory_count: trajectory_count as u64,
        window_count: groups.len() as u64,
    }
}

/// Metrics stashed in a batch's hyperparameters at submission time.
pub fn batch_metrics(batch: &TrainingBatch) -> ModelMetrics {
    batch
        .hyperparameters
        .get("metrics")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}
