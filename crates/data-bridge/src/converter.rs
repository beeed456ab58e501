//! Conversion of raw trajectories into training-ready examples.
//!
//! The converter reconstructs each session as an ordered message sequence
//! and attaches the window's ground-truth outcomes as context the judge can
//! reason over. Ground truth is never folded into the step rewards; the
//! scoring step weighs decision quality against outcome holistically instead
//! of this pipeline pre-judging via a fixed formula.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use training_core::types::{
    ExampleMetadata, GroundTruth, Message, Step, TrainingExample, Trajectory,
};
use training_core::{Error, Result};

/// Configuration for conversion and sub-sampling.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Desired number of trajectories per training run; dropout engages
    /// only above this.
    pub dropout_target: usize,
    /// Upper bound on the dropout rate. Must be within `0.0..=0.5`.
    pub max_dropout: f64,
    /// Cap on trajectories per cohort sent to the judge.
    pub max_per_group: usize,
    /// Minimum cohort members after sampling; relative scoring needs at
    /// least two.
    pub min_group_size: usize,
    /// Fixed RNG seed for reproducible sampling; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            dropout_target: 1000,
            max_dropout: 0.3,
            max_per_group: 8,
            min_group_size: 2,
            seed: None,
        }
    }
}

/// Dropout rate for a run with `actual` eligible trajectories against a
/// target size. Pure; zero whenever `actual <= target`.
pub fn dropout_rate(actual: usize, target: usize, max_dropout: f64) -> f64 {
    if actual <= target || actual == 0 {
        return 0.0;
    }
    let needed = 1.0 - (target as f64 / actual as f64);
    needed.min(max_dropout)
}

/// Converts trajectories into training examples with seeded sub-sampling.
pub struct ContextConverter {
    config: ConverterConfig,
    rng: Mutex<StdRng>,
}

impl ContextConverter {
    pub fn new(config: ConverterConfig) -> Result<Self> {
        if !(0.0..=0.5).contains(&config.max_dropout) {
            return Err(Error::Config {
                message: format!(
                    "max_dropout must be within 0.0..=0.5, got {}",
                    config.max_dropout
                ),
            });
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            rng: Mutex::new(rng),
        })
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Convert one trajectory.
    ///
    /// `Ok(None)` means the trajectory was intentionally excluded by the
    /// dropout draw; it is not an error. Malformed data is an error and is
    /// never repaired with guessed defaults.
    pub fn convert(
        &self,
        trajectory: &Trajectory,
        ground_truth: Option<&GroundTruth>,
        group_index: usize,
        dropout: f64,
    ) -> Result<Option<TrainingExample>> {
        if dropout > 0.0 {
            let draw: f64 = self
                .rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .gen();
            if draw < dropout {
                return Ok(None);
            }
        }

        if trajectory.steps.is_empty() {
            return Err(Error::DataIntegrity {
                message: format!("trajectory {} has no steps", trajectory.id),
            });
        }
        if trajectory.completed_step_count() == 0 {
            return Err(Error::DataIntegrity {
                message: format!("trajectory {} has no completed steps", trajectory.id),
            });
        }

        let mut messages = vec![Message::system(build_system_context(
            trajectory,
            ground_truth,
        ))];
        for step in &trajectory.steps {
            append_step_messages(&mut messages, step);
        }

        // System prompt plus at least one user/assistant exchange.
        if messages.len() < 3 {
            return Err(Error::DataIntegrity {
                message: format!(
                    "trajectory {} yields too few messages: {}",
                    trajectory.id,
                    messages.len()
                ),
            });
        }

        Ok(Some(TrainingExample {
            messages,
            metadata: ExampleMetadata {
                trajectory_id: trajectory.id,
                agent_id: trajectory.agent_id.clone(),
                window_id: trajectory.window_id.clone(),
                group_index,
                final_outcome: trajectory.final_outcome,
                step_count: trajectory.steps.len(),
                recorded_at: trajectory.ended_at,
                ground_truth: ground_truth.cloned(),
            },
        }))
    }

    /// Convert a full cohort, capping its size and applying per-trajectory
    /// dropout. Fails if fewer than `min_group_size` members survive;
    /// relative scoring cannot use a smaller group.
    pub fn convert_group(
        &self,
        trajectories: &[Trajectory],
        ground_truth: Option<&GroundTruth>,
        dropout: f64,
    ) -> Result<Vec<TrainingExample>> {
        if trajectories.len() < self.config.min_group_size {
            return Err(Error::DataIntegrity {
                message: format!(
                    "cohort has {} trajectories, need at least {}",
                    trajectories.len(),
                    self.config.min_group_size
                ),
            });
        }

        let sampled: Vec<&Trajectory> = if trajectories.len() > self.config.max_per_group {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            trajectories
                .choose_multiple(&mut *rng, self.config.max_per_group)
                .collect()
        } else {
            trajectories.iter().collect()
        };

        let mut examples = Vec::with_capacity(sampled.len());
        for trajectory in sampled {
            if let Some(example) =
                self.convert(trajectory, ground_truth, examples.len(), dropout)?
            {
                examples.push(example);
            }
        }

        if examples.len() < self.config.min_group_size {
            return Err(Error::DataIntegrity {
                message: format!(
                    "only {} trajectories remain after dropout, need at least {}",
                    examples.len(),
                    self.config.min_group_size
                ),
            });
        }

        debug!(
            cohort = trajectories.len(),
            converted = examples.len(),
            dropout,
            "Converted cohort"
        );

        Ok(examples)
    }
}

fn build_system_context(trajectory: &Trajectory, ground_truth: Option<&GroundTruth>) -> String {
    let mut msg = format!(
        "You are evaluating trading agent decisions.\n\nAGENT: {}\nTIME WINDOW: {}\n",
        trajectory.agent_id, trajectory.window_id
    );

    if let Some(truth) = ground_truth {
        if !truth.assets.is_empty() {
            msg.push_str("\nMARKET OUTCOMES (ground truth the agent didn't know):\n");
            msg.push_str(&truth.as_context());
        }
    }

    msg.push_str("\n\nEvaluate this agent's decisions given the outcomes.");
    msg
}

/// Reconstruct one step as a user/assistant exchange.
///
/// The primary model call supplies the actual prompts when present; steps
/// recorded without a model call fall back to the snapshot and action.
/// Incomplete steps with no model call carry no decision and are skipped.
fn append_step_messages(messages: &mut Vec<Message>, step: &Step) {
    if let Some(call) = step.primary_call() {
        messages.push(Message::user(call.user_prompt.clone()));
        messages.push(Message::assistant(call.response.clone()));
        return;
    }

    let Some(outcome) = step.outcome.as_ref() else {
        return;
    };

    let state = serde_json::to_string(&step.snapshot.values).unwrap_or_else(|_| "{}".to_string());
    messages.push(Message::user(format!("State: {state}")));

    let mut decision = outcome.action.action_type.clone();
    if !outcome.action.parameters.is_null() {
        if let Ok(params) = serde_json::to_string(&outcome.action.parameters) {
            if params != "{}" {
                decision.push(' ');
                decision.push_str(&params);
            }
        }
    }
    messages.push(Message::assistant(decision));
}
