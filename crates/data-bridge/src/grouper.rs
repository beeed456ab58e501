//! Window/cohort grouping over the trajectory store.

use std::sync::Arc;

use tracing::debug;

use training_core::store::TrajectoryStore;
use training_core::types::{Trajectory, WindowStats};
use training_core::window::Clock;
use training_core::Result;

/// Read-only grouping of trajectories into window cohorts.
///
/// A cohort is a derived query result, never a stored entity. The grouper
/// may run while agents are still writing; a window only shows up once its
/// hour has elapsed, so a cohort returned here is no longer growing.
pub struct CohortGrouper {
    store: Arc<dyn TrajectoryStore>,
    clock: Arc<dyn Clock>,
}

impl CohortGrouper {
    pub fn new(store: Arc<dyn TrajectoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Windows within the lookback with at least `min_agents` distinct
    /// agents, newest first. Membership counts agents, not trajectories: a
    /// window with trajectories {A, A, B} has two distinct agents.
    pub async fn eligible_windows(
        &self,
        lookback_hours: i64,
        min_agents: i64,
    ) -> Result<Vec<String>> {
        let windows = self
            .store
            .eligible_windows(self.clock.now(), lookback_hours, min_agents)
            .await?;

        debug!(
            lookback_hours,
            min_agents,
            eligible = windows.len(),
            "Queried eligible windows"
        );

        Ok(windows)
    }

    /// All trajectories in a window, one entry per trajectory. An agent with
    /// several sessions in the window contributes all of them; cohort
    /// membership is at the trajectory level.
    pub async fn window_data(&self, window_id: &str) -> Result<Vec<Trajectory>> {
        self.store.for_window(window_id).await
    }

    /// One agent's trajectories within a window.
    pub async fn agent_window_data(
        &self,
        window_id: &str,
        agent_id: &str,
    ) -> Result<Vec<Trajectory>> {
        self.store.for_window_agent(window_id, agent_id).await
    }

    /// Aggregate statistics for a window.
    pub async fn window_stats(&self, window_id: &str) -> Result<Option<WindowStats>> {
        self.store.window_stats(window_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use training_core::store::memory::MemoryStore;
    use training_core::window::FixedClock;
    use uuid::Uuid;

    fn seeded_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    async fn put(store: &MemoryStore, agent: &str, window: &str, hour: u32, minute: u32) {
        let ended_at = Utc.with_ymd_and_hms(2025, 1, 1, hour, minute, 0).unwrap();
        let trajectory = Trajectory {
            id: Uuid::new_v4(),
            agent_id: agent.to_string(),
            window_id: window.to_string(),
            steps: Vec::new(),
            final_outcome: Decimal::ZERO,
            started_at: ended_at,
            ended_at,
            used_in_training: false,
            training_eligible: true,
        };
        store.insert(&trajectory).await.unwrap();
    }

    #[tokio::test]
    async fn repeated_agent_does_not_make_window_eligible() {
        let store = seeded_store();
        put(&store, "A", "2025-01-01T09:00", 9, 10).await;
        put(&store, "A", "2025-01-01T09:00", 9, 40).await;

        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()));
        let grouper = CohortGrouper::new(store, clock);

        let windows = grouper.eligible_windows(24, 2).await.unwrap();
        assert!(windows.is_empty());
    }

    #[tokio::test]
    async fn cohort_includes_all_trajectories_of_each_agent() {
        let store = seeded_store();
        put(&store, "A", "2025-01-01T09:00", 9, 10).await;
        put(&store, "A", "2025-01-01T09:00", 9, 40).await;
        put(&store, "B", "2025-01-01T09:00", 9, 50).await;

        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()));
        let grouper = CohortGrouper::new(store, clock);

        let windows = grouper.eligible_windows(24, 2).await.unwrap();
        assert_eq!(windows, vec!["2025-01-01T09:00".to_string()]);

        let cohort = grouper.window_data("2025-01-01T09:00").await.unwrap();
        assert_eq!(cohort.len(), 3);

        let stats = grouper
            .window_stats("2025-01-01T09:00")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.agent_count, 2);
        assert_eq!(stats.trajectory_count, 3);
    }
}
