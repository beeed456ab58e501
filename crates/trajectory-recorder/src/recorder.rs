//! Per-agent in-memory accumulation of decision sessions.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use training_core::retry::{with_backoff, BackoffPolicy};
use training_core::store::TrajectoryStore;
use training_core::types::{
    AgentAction, EnvironmentSnapshot, ExternalRead, ModelCall, Step, StepOutcome, Trajectory,
};
use training_core::window::{self, Clock};
use training_core::{Error, Result};

/// Configuration for the trajectory recorder.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Backoff policy for the durable write at session end.
    pub persist_backoff: BackoffPolicy,
    /// Cap on trajectories parked for later retry after persistence failed.
    pub max_pending_retries: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            persist_backoff: BackoffPolicy::default(),
            max_pending_retries: 256,
        }
    }
}

/// One in-flight session being accumulated.
struct ActiveTrajectory {
    agent_id: String,
    window_id: String,
    started_at: DateTime<Utc>,
    completed_steps: Vec<Step>,
    open_step: Option<Step>,
    next_step_number: u32,
}

/// Captures agent decision sessions and persists them at session end.
///
/// Each agent's accumulator is independent; concurrent agents never contend
/// on each other's entries. The window id is derived from the injected clock
/// once, at `start`, so a session that crosses an hour boundary stays in its
/// original cohort.
pub struct TrajectoryRecorder {
    store: Arc<dyn TrajectoryStore>,
    clock: Arc<dyn Clock>,
    config: RecorderConfig,
    active: DashMap<Uuid, ActiveTrajectory>,
    /// Trajectories whose durable write exhausted its retries; drained by
    /// `flush_pending`. Bounded at `max_pending_retries`: once full, the
    /// oldest entry is evicted with an error log.
    pending: Mutex<VecDeque<Trajectory>>,
}

impl TrajectoryRecorder {
    pub fn new(
        store: Arc<dyn TrajectoryStore>,
        clock: Arc<dyn Clock>,
        config: RecorderConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            active: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Begin a new decision session for an agent.
    pub fn start(&self, agent_id: &str) -> Uuid {
        let now = self.clock.now();
        let trajectory_id = Uuid::new_v4();
        let window_id = window::window_id(now);

        self.active.insert(
            trajectory_id,
            ActiveTrajectory {
                agent_id: agent_id.to_string(),
                window_id: window_id.clone(),
                started_at: now,
                completed_steps: Vec::new(),
                open_step: None,
                next_step_number: 0,
            },
        );

        info!(
            trajectory_id = %trajectory_id,
            agent_id,
            window_id = %window_id,
            "Started trajectory"
        );

        trajectory_id
    }

    /// Open a new step with the environment state at decision time.
    ///
    /// An unfinished previous step is flushed as-is rather than lost.
    pub fn record_step(&self, trajectory_id: Uuid, snapshot: EnvironmentSnapshot) -> Result<()> {
        let mut entry = self
            .active
            .get_mut(&trajectory_id)
            .ok_or(Error::UnknownTrajectory { trajectory_id })?;

        if let Some(unfinished) = entry.open_step.take() {
            warn!(
                trajectory_id = %trajectory_id,
                step_number = unfinished.step_number,
                "Previous step was never completed; flushing without outcome"
            );
            entry.completed_steps.push(unfinished);
        }

        let step_number = entry.next_step_number;
        entry.next_step_number += 1;
        entry.open_step = Some(Step {
            step_number,
            timestamp: self.clock.now(),
            snapshot,
            external_reads: Vec::new(),
            model_calls: Vec::new(),
            outcome: None,
        });

        Ok(())
    }

    /// Attach a model invocation to the currently open step.
    ///
    /// Calling this with no open step is a programmer error and fails
    /// loudly; silently dropping the record would corrupt training data.
    pub fn log_model_call(&self, trajectory_id: Uuid, call: ModelCall) -> Result<()> {
        let mut entry = self
            .active
            .get_mut(&trajectory_id)
            .ok_or(Error::UnknownTrajectory { trajectory_id })?;

        match entry.open_step.as_mut() {
            Some(step) => {
                step.model_calls.push(call);
                Ok(())
            }
            None => Err(Error::NoOpenStep { trajectory_id }),
        }
    }

    /// Attach an external-data read to the currently open step.
    pub fn log_external_read(&self, trajectory_id: Uuid, read: ExternalRead) -> Result<()> {
        let mut entry = self
            .active
            .get_mut(&trajectory_id)
            .ok_or(Error::UnknownTrajectory { trajectory_id })?;

        match entry.open_step.as_mut() {
            Some(step) => {
                step.external_reads.push(read);
                Ok(())
            }
            None => Err(Error::NoOpenStep { trajectory_id }),
        }
    }

    /// Close the open step with its action result and reward.
    pub fn complete_step(&self, trajectory_id: Uuid, action: AgentAction, reward: f64) -> Result<()> {
        let mut entry = self
            .active
            .get_mut(&trajectory_id)
            .ok_or(Error::UnknownTrajectory { trajectory_id })?;

        let mut step = entry
            .open_step
            .take()
            .ok_or(Error::NoOpenStep { trajectory_id })?;
        step.outcome = Some(StepOutcome { action, reward });
        entry.completed_steps.push(step);

        Ok(())
    }

    /// End the session and persist the full trajectory in one write.
    ///
    /// The in-memory entry is removed up front; a persistence failure after
    /// retries parks the trajectory on the pending queue instead of
    /// discarding it, and surfaces the error to the caller.
    pub async fn end(&self, trajectory_id: Uuid, final_outcome: Decimal) -> Result<Trajectory> {
        let (_, mut active) = self
            .active
            .remove(&trajectory_id)
            .ok_or(Error::UnknownTrajectory { trajectory_id })?;

        let mut steps = std::mem::take(&mut active.completed_steps);
        if let Some(unfinished) = active.open_step.take() {
            warn!(
                trajectory_id = %trajectory_id,
                step_number = unfinished.step_number,
                "Trajectory ended with an open step; flushing without outcome"
            );
            steps.push(unfinished);
        }

        let trajectory = Trajectory {
            id: trajectory_id,
            agent_id: active.agent_id,
            window_id: active.window_id,
            steps,
            final_outcome,
            started_at: active.started_at,
            ended_at: self.clock.now(),
            used_in_training: false,
            training_eligible: true,
        };

        match self.persist(&trajectory).await {
            Ok(()) => {
                info!(
                    trajectory_id = %trajectory_id,
                    agent_id = %trajectory.agent_id,
                    window_id = %trajectory.window_id,
                    steps = trajectory.steps.len(),
                    final_outcome = %final_outcome,
                    "Persisted trajectory"
                );
                Ok(trajectory)
            }
            Err(e) => {
                error!(
                    trajectory_id = %trajectory_id,
                    error = %e,
                    "Persistence exhausted retries; queueing trajectory for later flush"
                );
                self.park(trajectory).await;
                Err(e)
            }
        }
    }

    /// Retry persistence for every parked trajectory. Returns how many were
    /// written; anything still failing goes back on the queue.
    pub async fn flush_pending(&self) -> Result<usize> {
        let mut parked: Vec<Trajectory> = {
            let mut pending = self.pending.lock().await;
            pending.drain(..).collect()
        };

        let mut flushed = 0;
        let mut still_failing = VecDeque::new();
        for trajectory in parked.drain(..) {
            match self.persist(&trajectory).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    warn!(
                        trajectory_id = %trajectory.id,
                        error = %e,
                        "Trajectory still failing to persist"
                    );
                    still_failing.push_back(trajectory);
                }
            }
        }

        if !still_failing.is_empty() {
            let mut pending = self.pending.lock().await;
            // Preserve order: still-failing entries go ahead of anything
            // parked while we were flushing.
            while let Some(t) = still_failing.pop_back() {
                pending.push_front(t);
            }
        }

        Ok(flushed)
    }

    /// Number of trajectories awaiting a retry flush.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Number of sessions currently accumulating in memory.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    async fn persist(&self, trajectory: &Trajectory) -> Result<()> {
        with_backoff(&self.config.persist_backoff, "trajectory_insert", || {
            self.store.insert(trajectory)
        })
        .await
    }

    async fn park(&self, trajectory: Trajectory) {
        let mut pending = self.pending.lock().await;
        if pending.len() >= self.config.max_pending_retries {
            // Dropping the oldest entry is the only remaining option once
            // the queue is full; make the loss impossible to miss.
            if let Some(evicted) = pending.pop_front() {
                error!(
                    trajectory_id = %evicted.id,
                    agent_id = %evicted.agent_id,
                    "Pending-retry queue full; evicting oldest unpersisted trajectory"
                );
            }
        }
        pending.push_back(trajectory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use training_core::store::memory::MemoryStore;
    use training_core::window::FixedClock;

    fn snapshot(balance: i64) -> EnvironmentSnapshot {
        let mut values = std::collections::BTreeMap::new();
        values.insert("agent_balance".to_string(), json!(balance));
        EnvironmentSnapshot::new(values)
    }

    fn action(kind: &str) -> AgentAction {
        AgentAction {
            action_type: kind.to_string(),
            parameters: json!({}),
            success: true,
            result: None,
            error: None,
        }
    }

    fn call() -> ModelCall {
        ModelCall {
            model: "test-model".to_string(),
            system_prompt: "system".to_string(),
            user_prompt: "user".to_string(),
            response: "buy".to_string(),
            reasoning: None,
            temperature: 0.7,
            max_tokens: 256,
            latency_ms: Some(12),
            purpose: training_core::types::CallPurpose::Action,
        }
    }

    fn recorder_with(store: Arc<MemoryStore>) -> TrajectoryRecorder {
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 0).unwrap(),
        ));
        let config = RecorderConfig {
            persist_backoff: BackoffPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..Default::default()
        };
        TrajectoryRecorder::new(store, clock, config)
    }

    #[tokio::test]
    async fn records_full_session() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store.clone());

        let id = recorder.start("agent-1");
        recorder.record_step(id, snapshot(1000)).unwrap();
        recorder.log_external_read(
            id,
            ExternalRead {
                provider: "price-feed".to_string(),
                data: json!({"ACME": 10.5}),
                purpose: "market check".to_string(),
            },
        )
        .unwrap();
        recorder.log_model_call(id, call()).unwrap();
        recorder.complete_step(id, action("buy"), 1.5).unwrap();

        let trajectory = recorder.end(id, Decimal::new(125, 2)).await.unwrap();

        assert_eq!(trajectory.agent_id, "agent-1");
        assert_eq!(trajectory.window_id, "2025-01-01T10:00");
        assert_eq!(trajectory.steps.len(), 1);
        assert_eq!(trajectory.steps[0].external_reads.len(), 1);
        assert_eq!(trajectory.steps[0].model_calls.len(), 1);
        assert_eq!(trajectory.steps[0].reward(), Some(1.5));
        assert!(!trajectory.used_in_training);
        assert_eq!(store.trajectory_count().await, 1);
        assert_eq!(recorder.active_count(), 0);
    }

    #[tokio::test]
    async fn logging_without_open_step_fails_loudly() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);

        let id = recorder.start("agent-1");
        let err = recorder.log_model_call(id, call()).unwrap_err();
        assert!(matches!(err, Error::NoOpenStep { .. }));

        // Same after a step has been completed.
        recorder.record_step(id, snapshot(1000)).unwrap();
        recorder.complete_step(id, action("wait"), 0.0).unwrap();
        let err = recorder
            .log_external_read(
                id,
                ExternalRead {
                    provider: "p".to_string(),
                    data: json!({}),
                    purpose: "x".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoOpenStep { .. }));
    }

    #[tokio::test]
    async fn unknown_trajectory_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);

        let err = recorder
            .record_step(Uuid::new_v4(), snapshot(0))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTrajectory { .. }));
    }

    #[tokio::test]
    async fn open_step_is_flushed_without_outcome_at_end() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store);

        let id = recorder.start("agent-1");
        recorder.record_step(id, snapshot(1000)).unwrap();
        recorder.complete_step(id, action("buy"), 1.0).unwrap();
        recorder.record_step(id, snapshot(900)).unwrap();
        // Abnormal termination: second step never completed.

        let trajectory = recorder.end(id, Decimal::ZERO).await.unwrap();
        assert_eq!(trajectory.steps.len(), 2);
        assert!(trajectory.steps[0].outcome.is_some());
        assert!(trajectory.steps[1].outcome.is_none());
        assert_eq!(trajectory.completed_step_count(), 1);
    }

    #[tokio::test]
    async fn window_id_fixed_at_start() {
        let store = Arc::new(MemoryStore::new());
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 10, 59, 0).unwrap();
        let clock = Arc::new(FixedClock(start));
        let recorder =
            TrajectoryRecorder::new(store.clone(), clock, RecorderConfig::default());

        let id = recorder.start("agent-1");
        // The session would cross into 11:00 in real time; the recorder
        // never recomputes the window.
        let trajectory = recorder.end(id, Decimal::ZERO).await.unwrap();
        assert_eq!(trajectory.window_id, "2025-01-01T10:00");
    }

    #[tokio::test]
    async fn persistence_failure_parks_trajectory_for_retry() {
        let store = Arc::new(MemoryStore::new());
        let recorder = recorder_with(store.clone());

        let id = recorder.start("agent-1");
        recorder.record_step(id, snapshot(1000)).unwrap();
        recorder.complete_step(id, action("buy"), 1.0).unwrap();

        // Both backoff attempts fail; the trajectory must be queued, not lost.
        store.fail_next_inserts(2);
        let err = recorder.end(id, Decimal::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        assert_eq!(recorder.pending_count().await, 1);
        assert_eq!(store.trajectory_count().await, 0);

        // Store recovers; flush drains the queue.
        let flushed = recorder.flush_pending().await.unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(recorder.pending_count().await, 0);
        assert_eq!(store.trajectory_count().await, 1);
    }

    #[tokio::test]
    async fn full_pending_queue_evicts_the_oldest() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 1, 1, 10, 15, 0).unwrap(),
        ));
        let config = RecorderConfig {
            persist_backoff: BackoffPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            max_pending_retries: 1,
        };
        let recorder = TrajectoryRecorder::new(store.clone(), clock, config);

        // Two sessions end during an outage; both exhaust their retries.
        store.fail_next_inserts(4);
        let first = recorder.start("agent-1");
        recorder.end(first, Decimal::ZERO).await.unwrap_err();
        let second = recorder.start("agent-2");
        recorder.end(second, Decimal::ZERO).await.unwrap_err();

        // The queue holds one entry; the older session was evicted.
        assert_eq!(recorder.pending_count().await, 1);

        assert_eq!(recorder.flush_pending().await.unwrap(), 1);
        let survivors = store
            .for_window_agent("2025-01-01T10:00", "agent-2")
            .await
            .unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(store.trajectory_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_sessions_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(recorder_with(store.clone()));

        let mut handles = Vec::new();
        for i in 0..8i64 {
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                let agent = format!("agent-{i}");
                let id = recorder.start(&agent);
                recorder.record_step(id, snapshot(1000 + i)).unwrap();
                recorder.complete_step(id, action("trade"), 0.5).unwrap();
                recorder.end(id, Decimal::from(i)).await.unwrap()
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.trajectory_count().await, 8);
    }
}
