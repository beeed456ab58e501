//! End-to-end pipeline tests over the in-memory store.
//!
//! Walks the full cycle: agents record sessions, windows close and form
//! cohorts, cohorts are converted and scored, a batch trains, and the
//! resulting model moves through stage, promotion, and rollback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use cohort_scorer::{CohortScorer, Judge, JudgeRequest, JudgeScore, ScorerConfig};
use data_bridge::{CohortGrouper, ContextConverter, ConverterConfig};
use model_registry::{ArtifactStore, DeploymentController, ModelRegistry};
use training_core::config::{DeploymentConfig, EngineConfig, TrainingConfig};
use training_core::store::memory::MemoryStore;
use training_core::store::{ModelStore, TrajectoryStore};
use training_core::types::{
    AgentAction, AssetOutcome, BatchStatus, CallPurpose, DeploymentStatus, EnvironmentSnapshot,
    GroundTruth, ModelCall, ModelVersion, VersionBump,
};
use training_core::window::{Clock, FixedClock};
use training_core::Result;
use training_orchestrator::{
    batch_metrics, JobStatus, OrchestratorConfig, TrainingEngine, TrainingOrchestrator,
    TrainingSubmission,
};
use trajectory_recorder::{RecorderConfig, TrajectoryRecorder};

struct InstantEngine {
    jobs: AtomicU32,
    submissions: StdMutex<Vec<TrainingSubmission>>,
}

impl InstantEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: AtomicU32::new(0),
            submissions: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TrainingEngine for InstantEngine {
    async fn submit(&self, submission: &TrainingSubmission) -> Result<String> {
        self.submissions.lock().unwrap().push(submission.clone());
        let n = self.jobs.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{n}"))
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        Ok(JobStatus::Completed {
            checkpoint: format!("ckpt-{job_id}"),
        })
    }
}

/// Scores proportionally to position in the cohort, so entries are
/// distinguishable downstream.
struct RankingJudge;

#[async_trait]
impl Judge for RankingJudge {
    async fn score(&self, request: &JudgeRequest) -> Result<Vec<JudgeScore>> {
        let n = request.candidates.len().max(1) as f64;
        Ok(request
            .candidates
            .iter()
            .enumerate()
            .map(|(i, c)| JudgeScore {
                trajectory_id: c.trajectory_id,
                score: (i as f64 + 1.0) / (n + 1.0),
                justification: format!("rank {} of {}", i + 1, request.candidates.len()),
            })
            .collect())
    }
}

struct NullArtifacts;

#[async_trait]
impl ArtifactStore for NullArtifacts {
    async fn store(&self, version: ModelVersion, _checkpoint_ref: &str) -> Result<String> {
        Ok(format!("/models/{version}"))
    }

    async fn list(&self) -> Result<Vec<ModelVersion>> {
        Ok(Vec::new())
    }
}

/// Record one two-step session for an agent through the recorder.
async fn record_session(recorder: &TrajectoryRecorder, agent: &str, outcome: Decimal) -> Uuid {
    let id = recorder.start(agent);

    for step in 0..2u32 {
        let mut values = BTreeMap::new();
        values.insert("agent_balance".to_string(), json!(1000 + step));
        recorder
            .record_step(id, EnvironmentSnapshot::new(values))
            .unwrap();
        recorder
            .log_model_call(
                id,
                ModelCall {
                    model: "agent-model".to_string(),
                    system_prompt: "you trade".to_string(),
                    user_prompt: format!("market state {step}"),
                    response: format!("decision {step}"),
                    reasoning: None,
                    temperature: 0.7,
                    max_tokens: 256,
                    latency_ms: Some(40),
                    purpose: CallPurpose::Action,
                },
            )
            .unwrap();
        recorder
            .complete_step(
                id,
                AgentAction {
                    action_type: "buy".to_string(),
                    parameters: json!({"symbol": "ACME", "qty": 1}),
                    success: true,
                    result: None,
                    error: None,
                },
                0.2,
            )
            .unwrap();
    }

    recorder.end(id, outcome).await.unwrap();
    id
}

fn ground_truth(window_id: &str) -> GroundTruth {
    let mut assets = BTreeMap::new();
    assets.insert(
        "ACME".to_string(),
        AssetOutcome {
            symbol: "ACME".to_string(),
            start_price: Decimal::new(1000, 2),
            end_price: Decimal::new(1080, 2),
            change_pct: Decimal::new(8, 0),
            sentiment: None,
            headlines: vec!["ACME rallies on earnings".to_string()],
        },
    );
    GroundTruth {
        window_id: window_id.to_string(),
        window_start: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
        window_end: Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
        assets,
        overall_trend: None,
        volatility: None,
    }
}

fn orchestrator(
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    engine: Arc<InstantEngine>,
) -> TrainingOrchestrator {
    TrainingOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        engine,
        CohortGrouper::new(store.clone(), clock.clone()),
        ContextConverter::new(ConverterConfig {
            seed: Some(42),
            ..Default::default()
        })
        .unwrap(),
        CohortScorer::new(Arc::new(RankingJudge), ScorerConfig::default()),
        clock,
        OrchestratorConfig {
            training: TrainingConfig {
                min_agents_per_window: 2,
                lookback_hours: 24,
                min_trajectories: 3,
                min_eligible_windows: 1,
                quality_sample_size: 5,
                dropout_target: 100,
                max_dropout: 0.3,
                max_per_group: 8,
                min_group_size: 2,
                sample_seed: Some(42),
            },
            engine: EngineConfig {
                base_url: "http://localhost:9500".to_string(),
                base_model: "test-base".to_string(),
                learning_rate: 1e-5,
            },
            poll_interval: Duration::ZERO,
            max_poll: Duration::from_secs(60),
            max_poll_failures: 3,
            max_concurrent_scoring: 2,
        },
    )
}

fn deployment_config() -> DeploymentConfig {
    DeploymentConfig {
        initial_rollout_pct: 10,
        max_stage_rollout_pct: 50,
        regression_tolerance: 0.05,
        artifact_dir: "/tmp/model-artifacts-test".to_string(),
    }
}

#[tokio::test]
async fn full_cycle_from_recording_to_deployed_model() {
    let store = Arc::new(MemoryStore::new());

    // Sessions recorded during the 09:00 window.
    let session_clock = Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 5, 0).unwrap(),
    ));
    let recorder = TrajectoryRecorder::new(store.clone(), session_clock, RecorderConfig::default());
    // Six trajectories across three agents: every agent trades twice in the
    // same hour, so the cohort has multiple entries per agent.
    record_session(&recorder, "alice", Decimal::new(150, 2)).await;
    record_session(&recorder, "alice", Decimal::new(40, 2)).await;
    record_session(&recorder, "bob", Decimal::new(-75, 2)).await;
    record_session(&recorder, "bob", Decimal::new(-20, 2)).await;
    record_session(&recorder, "carol", Decimal::new(30, 2)).await;
    record_session(&recorder, "carol", Decimal::new(95, 2)).await;

    store
        .put_ground_truth(ground_truth("2025-01-01T09:00"))
        .await;

    // The pipeline runs hours later, after the window has closed.
    let pipeline_clock: Arc<dyn Clock> = Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
    ));
    let engine = InstantEngine::new();
    let orchestrator = orchestrator(store.clone(), pipeline_clock.clone(), engine.clone());

    let batch = orchestrator.submit_if_ready().await.unwrap().unwrap();
    assert_eq!(batch.window_ids, vec!["2025-01-01T09:00".to_string()]);
    assert_eq!(batch.trajectory_ids.len(), 6);

    // Each trajectory is converted and scored on its own, not collapsed per
    // agent.
    {
        let submissions = engine.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        let group = &submissions[0].groups[0];
        assert_eq!(group.examples.len(), 6);
        assert_eq!(group.scores.len(), 6);
        let agents: std::collections::BTreeSet<&str> = group
            .scores
            .iter()
            .map(|s| s.agent_id.as_str())
            .collect();
        assert_eq!(agents.len(), 3);
    }

    let done = orchestrator.monitor(batch).await.unwrap();
    assert_eq!(done.status, BatchStatus::Completed);
    assert_eq!(store.count_unused().await.unwrap(), 0);

    // Register and deploy the result.
    let registry = ModelRegistry::new(
        store.clone(),
        Arc::new(NullArtifacts),
        pipeline_clock.clone(),
    );
    let deployer = DeploymentController::new(store.clone(), pipeline_clock, deployment_config());

    let metrics = batch_metrics(&done);
    assert_eq!(metrics.trajectory_count, 6);
    assert_eq!(metrics.window_count, 1);
    assert!(metrics.avg_score > 0.0);

    let model = registry
        .register(
            VersionBump::Minor,
            done.base_model.clone(),
            done.checkpoint_ref.clone().unwrap(),
            metrics,
        )
        .await
        .unwrap();
    assert_eq!(model.version, ModelVersion::new(1, 0, 0));

    deployer.deploy(model.version, None).await.unwrap();
    deployer.promote(model.version).await.unwrap();

    let active = store.active().await.unwrap().unwrap();
    assert_eq!(active.version, ModelVersion::new(1, 0, 0));
    assert_eq!(active.rollout_pct, 100);
}

#[tokio::test]
async fn second_cycle_produces_a_new_version_and_rollback_restores_the_first() {
    let store = Arc::new(MemoryStore::new());

    let registry = ModelRegistry::new(
        store.clone(),
        Arc::new(NullArtifacts),
        Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
        )),
    );
    let deployer = DeploymentController::new(
        store.clone(),
        Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 1, 1, 13, 0, 0).unwrap(),
        )),
        deployment_config(),
    );

    for checkpoint in ["ckpt-a", "ckpt-b"] {
        let model = registry
            .register(
                VersionBump::Minor,
                "test-base".to_string(),
                checkpoint.to_string(),
                Default::default(),
            )
            .await
            .unwrap();
        deployer.deploy(model.version, None).await.unwrap();
        deployer.promote(model.version).await.unwrap();
    }

    let active = store.active().await.unwrap().unwrap();
    assert_eq!(active.version, ModelVersion::new(1, 1, 0));

    let restored = deployer
        .rollback("regression observed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.version, ModelVersion::new(1, 0, 0));

    let rolled_back = store
        .get_model(ModelVersion::new(1, 1, 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
}

#[tokio::test]
async fn sessions_in_the_open_window_are_not_trained_on() {
    let store = Arc::new(MemoryStore::new());

    // Sessions recorded in the hour that is still in progress.
    let session_clock = Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 10, 0).unwrap(),
    ));
    let recorder = TrajectoryRecorder::new(store.clone(), session_clock, RecorderConfig::default());
    record_session(&recorder, "alice", Decimal::ZERO).await;
    record_session(&recorder, "bob", Decimal::ZERO).await;
    record_session(&recorder, "carol", Decimal::ZERO).await;

    let pipeline_clock: Arc<dyn Clock> = Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 30, 0).unwrap(),
    ));
    let orchestrator = orchestrator(store.clone(), pipeline_clock, InstantEngine::new());

    // Enough data exists, but the only window is still open.
    assert!(orchestrator.submit_if_ready().await.unwrap().is_none());
    assert_eq!(store.count_unused().await.unwrap(), 3);
}
