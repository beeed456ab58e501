//! Trajectory types: one agent's recorded decision session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque key/value environment state at a decision point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub values: BTreeMap<String, Value>,
}

impl EnvironmentSnapshot {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// One external-data read the agent performed before deciding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalRead {
    pub provider: String,
    pub data: Value,
    pub purpose: String,
}

/// What a model invocation was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    Action,
    Reasoning,
    Evaluation,
    Response,
}

/// One model invocation within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCall {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub response: String,
    pub reasoning: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub latency_ms: Option<u64>,
    pub purpose: CallPurpose,
}

/// The action an agent chose, with its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAction {
    pub action_type: String,
    pub parameters: Value,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Action result and reward for a completed step.
///
/// Grouped so the reward can only ever be assigned together with the action
/// result, never separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub action: AgentAction,
    pub reward: f64,
}

/// A single decision point within a trajectory.
///
/// A `None` outcome means the step was opened but never completed and was
/// flushed as-is when the trajectory ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_number: u32,
    pub timestamp: DateTime<Utc>,
    pub snapshot: EnvironmentSnapshot,
    pub external_reads: Vec<ExternalRead>,
    pub model_calls: Vec<ModelCall>,
    pub outcome: Option<StepOutcome>,
}

impl Step {
    /// Reward of the step, if it was completed.
    pub fn reward(&self) -> Option<f64> {
        self.outcome.as_ref().map(|o| o.reward)
    }

    /// Primary model call driving the step, if any.
    pub fn primary_call(&self) -> Option<&ModelCall> {
        self.model_calls.first()
    }
}

/// One agent's continuous behavioral record over a decision session.
///
/// The window id is assigned once when the session starts and never
/// recomputed, so a long-running session stays in its original cohort even
/// when it crosses an hour boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: Uuid,
    pub agent_id: String,
    pub window_id: String,
    pub steps: Vec<Step>,
    /// Net position change over the session.
    pub final_outcome: Decimal,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub used_in_training: bool,
    pub training_eligible: bool,
}

impl Trajectory {
    /// Sum of rewards over completed steps.
    pub fn total_reward(&self) -> f64 {
        self.steps.iter().filter_map(Step::reward).sum()
    }

    /// Number of steps that were completed with an action and reward.
    pub fn completed_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.is_some()).count()
    }
}

/// Aggregate statistics over all trajectories in one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStats {
    pub window_id: String,
    pub agent_count: u64,
    pub trajectory_count: u64,
    pub total_steps: u64,
    pub avg_outcome: Decimal,
    pub min_outcome: Decimal,
    pub max_outcome: Decimal,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
