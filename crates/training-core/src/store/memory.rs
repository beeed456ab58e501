//! In-memory store implementing every persistence trait.
//!
//! Used by unit and integration tests, and by the scheduler's dry-run mode
//! where a database is not available. Mirrors the PostgreSQL repositories'
//! query semantics exactly, including the distinct-agent eligibility rule
//! and the exclusion of the still-open current window.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{
    BatchStatus, DeploymentStatus, GroundTruth, ModelVersion, TrainedModel, TrainingBatch,
    Trajectory, WindowStats,
};
use crate::window;
use crate::{Error, Result};

use super::{BatchStore, ModelStore, OutcomeStore, TrajectoryStore};

/// All pipeline state behind async locks.
#[derive(Default)]
pub struct MemoryStore {
    trajectories: RwLock<Vec<Trajectory>>,
    outcomes: RwLock<HashMap<String, GroundTruth>>,
    batches: RwLock<HashMap<Uuid, TrainingBatch>>,
    models: RwLock<HashMap<ModelVersion, TrainedModel>>,
    /// When non-zero, the next N trajectory inserts fail. Lets tests
    /// exercise the recorder's retry and pending-queue paths.
    fail_inserts: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` trajectory inserts fail, simulating a store outage.
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// Seed a ground-truth record for a window.
    pub async fn put_ground_truth(&self, truth: GroundTruth) {
        self.outcomes
            .write()
            .await
            .insert(truth.window_id.clone(), truth);
    }

    pub async fn trajectory_count(&self) -> usize {
        self.trajectories.read().await.len()
    }
}

#[async_trait]
impl TrajectoryStore for MemoryStore {
    async fn insert(&self, trajectory: &Trajectory) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) > 0 {
            self.fail_inserts.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::DataIntegrity {
                message: "simulated store outage".to_string(),
            });
        }
        self.trajectories.write().await.push(trajectory.clone());
        Ok(())
    }

    async fn eligible_windows(
        &self,
        now: DateTime<Utc>,
        lookback_hours: i64,
        min_agents: i64,
    ) -> Result<Vec<String>> {
        let cutoff = now - Duration::hours(lookback_hours);
        let current = window::window_id(now);

        let trajectories = self.trajectories.read().await;
        let mut agents_per_window: HashMap<String, HashSet<String>> = HashMap::new();
        for t in trajectories.iter() {
            // Lexicographic comparison is chronological for window ids.
            if t.ended_at > cutoff && t.window_id < current {
                agents_per_window
                    .entry(t.window_id.clone())
                    .or_default()
                    .insert(t.agent_id.clone());
            }
        }

        let mut windows: Vec<String> = agents_per_window
            .into_iter()
            .filter(|(_, agents)| agents.len() as i64 >= min_agents)
            .map(|(window_id, _)| window_id)
            .collect();
        windows.sort_by(|a, b| b.cmp(a));
        Ok(windows)
    }

    async fn for_window(&self, window_id: &str) -> Result<Vec<Trajectory>> {
        let trajectories = self.trajectories.read().await;
        Ok(trajectories
            .iter()
            .filter(|t| t.window_id == window_id)
            .cloned()
            .collect())
    }

    async fn for_window_agent(&self, window_id: &str, agent_id: &str) -> Result<Vec<Trajectory>> {
        let trajectories = self.trajectories.read().await;
        Ok(trajectories
            .iter()
            .filter(|t| t.window_id == window_id && t.agent_id == agent_id)
            .cloned()
            .collect())
    }

    async fn window_stats(&self, window_id: &str) -> Result<Option<WindowStats>> {
        let members = self.for_window(window_id).await?;
        if members.is_empty() {
            return Ok(None);
        }

        let agents: HashSet<&str> = members.iter().map(|t| t.agent_id.as_str()).collect();
        let outcomes: Vec<Decimal> = members.iter().map(|t| t.final_outcome).collect();
        let sum: Decimal = outcomes.iter().copied().sum();

        Ok(Some(WindowStats {
            window_id: window_id.to_string(),
            agent_count: agents.len() as u64,
            trajectory_count: members.len() as u64,
            total_steps: members.iter().map(|t| t.steps.len() as u64).sum(),
            avg_outcome: sum / Decimal::from(members.len()),
            min_outcome: outcomes.iter().copied().min().unwrap_or(Decimal::ZERO),
            max_outcome: outcomes.iter().copied().max().unwrap_or(Decimal::ZERO),
            started_at: members.iter().map(|t| t.started_at).min(),
            ended_at: members.iter().map(|t| t.ended_at).max(),
        }))
    }

    async fn count_unused(&self) -> Result<u64> {
        let trajectories = self.trajectories.read().await;
        Ok(trajectories.iter().filter(|t| !t.used_in_training).count() as u64)
    }

    async fn sample_unused(&self, limit: usize) -> Result<Vec<Trajectory>> {
        let trajectories = self.trajectories.read().await;
        Ok(trajectories
            .iter()
            .filter(|t| !t.used_in_training)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_used(&self, ids: &[Uuid]) -> Result<()> {
        let id_set: HashSet<&Uuid> = ids.iter().collect();
        let mut trajectories = self.trajectories.write().await;
        for t in trajectories.iter_mut() {
            if id_set.contains(&t.id) {
                t.used_in_training = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OutcomeStore for MemoryStore {
    async fn ground_truth(&self, window_id: &str) -> Result<Option<GroundTruth>> {
        Ok(self.outcomes.read().await.get(window_id).cloned())
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn insert_batch(&self, batch: &TrainingBatch) -> Result<()> {
        self.batches.write().await.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn update_batch(&self, batch: &TrainingBatch) -> Result<()> {
        self.batches.write().await.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<TrainingBatch>> {
        Ok(self.batches.read().await.get(&id).cloned())
    }

    async fn find_open(&self) -> Result<Option<TrainingBatch>> {
        let batches = self.batches.read().await;
        Ok(batches
            .values()
            .find(|b| !b.status.is_terminal())
            .cloned())
    }

    async fn list_by_status(&self, status: BatchStatus) -> Result<Vec<TrainingBatch>> {
        let batches = self.batches.read().await;
        Ok(batches
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ModelStore for MemoryStore {
    async fn insert_model(&self, model: &TrainedModel) -> Result<()> {
        let mut models = self.models.write().await;
        if models.contains_key(&model.version) {
            return Err(Error::Registry {
                message: format!("version {} already registered", model.version),
            });
        }
        models.insert(model.version, model.clone());
        Ok(())
    }

    async fn update_model(&self, model: &TrainedModel) -> Result<()> {
        let mut models = self.models.write().await;
        if !models.contains_key(&model.version) {
            return Err(Error::Registry {
                message: format!("unknown version {}", model.version),
            });
        }
        models.insert(model.version, model.clone());
        Ok(())
    }

    async fn get_model(&self, version: ModelVersion) -> Result<Option<TrainedModel>> {
        Ok(self.models.read().await.get(&version).cloned())
    }

    async fn latest_version(&self) -> Result<Option<ModelVersion>> {
        Ok(self.models.read().await.keys().max().copied())
    }

    async fn active(&self) -> Result<Option<TrainedModel>> {
        let models = self.models.read().await;
        Ok(models
            .values()
            .find(|m| m.status == DeploymentStatus::Active)
            .cloned())
    }

    async fn previous_active(&self) -> Result<Option<TrainedModel>> {
        let models = self.models.read().await;
        Ok(models
            .values()
            .filter(|m| {
                m.status != DeploymentStatus::Active
                    && m.status != DeploymentStatus::RolledBack
                    && m.activated_at.is_some()
            })
            .max_by_key(|m| m.activated_at)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<TrainedModel>> {
        let models = self.models.read().await;
        let mut all: Vec<TrainedModel> = models.values().cloned().collect();
        all.sort_by_key(|m| m.version);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trajectory(agent: &str, window: &str, ended_at: DateTime<Utc>) -> Trajectory {
        Trajectory {
            id: Uuid::new_v4(),
            agent_id: agent.to_string(),
            window_id: window.to_string(),
            steps: Vec::new(),
            final_outcome: Decimal::ZERO,
            started_at: ended_at - Duration::minutes(30),
            ended_at,
            used_in_training: false,
            training_eligible: true,
        }
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn eligibility_counts_distinct_agents() {
        let store = MemoryStore::new();
        // Window 10:00 has agents {A, A, B}: eligible with min_agents = 2.
        store.insert(&trajectory("A", "2025-01-01T10:00", ts(10, 20))).await.unwrap();
        store.insert(&trajectory("A", "2025-01-01T10:00", ts(10, 40))).await.unwrap();
        store.insert(&trajectory("B", "2025-01-01T10:00", ts(10, 50))).await.unwrap();
        // Window 09:00 has only {A, A}: not eligible.
        store.insert(&trajectory("A", "2025-01-01T09:00", ts(9, 20))).await.unwrap();
        store.insert(&trajectory("A", "2025-01-01T09:00", ts(9, 40))).await.unwrap();

        let now = ts(12, 0);
        let windows = store.eligible_windows(now, 24, 2).await.unwrap();
        assert_eq!(windows, vec!["2025-01-01T10:00".to_string()]);
    }

    #[tokio::test]
    async fn current_window_is_excluded_while_open() {
        let store = MemoryStore::new();
        store.insert(&trajectory("A", "2025-01-01T10:00", ts(10, 10))).await.unwrap();
        store.insert(&trajectory("B", "2025-01-01T10:00", ts(10, 20))).await.unwrap();

        // Still inside the 10:00 hour: the cohort may still be growing.
        let during = store.eligible_windows(ts(10, 30), 24, 2).await.unwrap();
        assert!(during.is_empty());

        // After the hour has elapsed the window closes for scoring.
        let after = store.eligible_windows(ts(11, 5), 24, 2).await.unwrap();
        assert_eq!(after, vec!["2025-01-01T10:00".to_string()]);
    }

    #[tokio::test]
    async fn window_data_includes_every_trajectory_per_agent() {
        let store = MemoryStore::new();
        store.insert(&trajectory("A", "2025-01-01T10:00", ts(10, 20))).await.unwrap();
        store.insert(&trajectory("A", "2025-01-01T10:00", ts(10, 40))).await.unwrap();
        store.insert(&trajectory("B", "2025-01-01T10:00", ts(10, 50))).await.unwrap();

        let all = store.for_window("2025-01-01T10:00").await.unwrap();
        assert_eq!(all.len(), 3);

        let only_a = store
            .for_window_agent("2025-01-01T10:00", "A")
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);
    }

    #[tokio::test]
    async fn mark_used_is_idempotent() {
        let store = MemoryStore::new();
        let t = trajectory("A", "2025-01-01T10:00", ts(10, 20));
        store.insert(&t).await.unwrap();

        store.mark_used(&[t.id]).await.unwrap();
        store.mark_used(&[t.id]).await.unwrap();

        assert_eq!(store.count_unused().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn previous_active_prefers_latest_activation() {
        let store = MemoryStore::new();
        let mut older = TrainedModel {
            version: ModelVersion::new(1, 0, 4),
            base_model: "base".to_string(),
            storage_path: "models/v1.0.4".to_string(),
            metrics: Default::default(),
            status: DeploymentStatus::Staged,
            rollout_pct: 100,
            created_at: ts(8, 0),
            deployed_at: Some(ts(8, 10)),
            activated_at: Some(ts(8, 30)),
        };
        let mut newer = older.clone();
        newer.version = ModelVersion::new(1, 0, 5);
        newer.activated_at = Some(ts(9, 30));
        store.insert_model(&older).await.unwrap();
        store.insert_model(&newer).await.unwrap();

        let previous = store.previous_active().await.unwrap().unwrap();
        assert_eq!(previous.version, ModelVersion::new(1, 0, 5));

        // A rolled-back model is never a restore target.
        newer.status = DeploymentStatus::RolledBack;
        store.update_model(&newer).await.unwrap();
        older.status = DeploymentStatus::Staged;
        store.update_model(&older).await.unwrap();
        let previous = store.previous_active().await.unwrap().unwrap();
        assert_eq!(previous.version, ModelVersion::new(1, 0, 4));
    }
}
