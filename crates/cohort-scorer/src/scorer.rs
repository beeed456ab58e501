//! Validation and fallback around the judge.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

use training_core::types::{Role, ScoredGroup, ScoredTrajectory, TrainingExample};
use training_core::{Error, Result};

use crate::judge::{Judge, JudgeCandidate, JudgeRequest, JudgeScore};

/// Rubric handed to the judge alongside each cohort. Weights reflect what
/// matters for trading sessions; callers with a different domain supply
/// their own.
pub const DEFAULT_RUBRIC: &str = "\
Score each agent relative to the others in this cohort, from 0.0 (worst) \
to 1.0 (best). Weigh: profit and loss against what the market made possible \
(40%), entry and exit timing (30%), risk management and position sizing \
(20%), and opportunity capture, including penalizing inaction when clear \
opportunities existed (10%). Ground truth describes what actually happened; \
judge decision quality given what the agent could know, informed by the \
outcome.";

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub rubric: String,
    /// Substitute outcome-ranked heuristic scores when the judge is
    /// unreachable. Off by default; every fallback use is logged loudly.
    pub fallback_enabled: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            rubric: DEFAULT_RUBRIC.to_string(),
            fallback_enabled: false,
        }
    }
}

/// Scores one cohort at a time and enforces the all-or-nothing contract.
pub struct CohortScorer {
    judge: Arc<dyn Judge>,
    config: ScorerConfig,
}

impl CohortScorer {
    pub fn new(judge: Arc<dyn Judge>, config: ScorerConfig) -> Self {
        Self { judge, config }
    }

    /// Score a complete cohort.
    ///
    /// Fails the whole cohort unless the judge returns exactly one in-range
    /// score per trajectory. With fallback enabled, a judge failure degrades
    /// to outcome-ranked heuristic scores instead.
    pub async fn score_cohort(&self, examples: &[TrainingExample]) -> Result<ScoredGroup> {
        let window_id = cohort_window(examples)?;

        let candidates: Vec<JudgeCandidate> = examples
            .iter()
            .map(|e| JudgeCandidate {
                trajectory_id: e.metadata.trajectory_id,
                agent_id: e.metadata.agent_id.clone(),
                final_outcome: e.metadata.final_outcome,
                transcript: render_transcript(e),
            })
            .collect();

        let request = JudgeRequest {
            window_id: window_id.clone(),
            rubric: self.config.rubric.clone(),
            candidates,
        };

        let scores = match self.judge.score(&request).await {
            Ok(scores) => scores,
            Err(e) if self.config.fallback_enabled => {
                warn!(
                    window_id = %window_id,
                    error = %e,
                    "Judge unavailable, using outcome-ranked fallback scores"
                );
                return Ok(fallback_group(&window_id, examples));
            }
            Err(e) => return Err(e),
        };

        let group = assemble_group(&window_id, examples, scores)?;
        info!(
            window_id = %window_id,
            entries = group.len(),
            avg_score = group.avg_score(),
            "Scored cohort"
        );
        Ok(group)
    }
}

fn cohort_window(examples: &[TrainingExample]) -> Result<String> {
    let Some(first) = examples.first() else {
        return Err(Error::DataIntegrity {
            message: "cannot score an empty cohort".to_string(),
        });
    };
    let window_id = first.metadata.window_id.clone();
    if examples.iter().any(|e| e.metadata.window_id != window_id) {
        return Err(Error::DataIntegrity {
            message: "cohort mixes trajectories from different windows".to_string(),
        });
    }
    Ok(window_id)
}

/// Enforce exactly one in-range score per trajectory, in cohort order.
fn assemble_group(
    window_id: &str,
    examples: &[TrainingExample],
    scores: Vec<JudgeScore>,
) -> Result<ScoredGroup> {
    let expected: HashSet<_> = examples.iter().map(|e| e.metadata.trajectory_id).collect();

    let mut seen = HashSet::new();
    for score in &scores {
        if !expected.contains(&score.trajectory_id) {
            return Err(Error::Judge {
                message: format!(
                    "judge returned score for unknown trajectory {}",
                    score.trajectory_id
                ),
            });
        }
        if !seen.insert(score.trajectory_id) {
            return Err(Error::Judge {
                message: format!(
                    "judge returned duplicate score for trajectory {}",
                    score.trajectory_id
                ),
            });
        }
        if !(0.0..=1.0).contains(&score.score) || !score.score.is_finite() {
            return Err(Error::Judge {
                message: format!(
                    "score {} for trajectory {} is outside [0, 1]",
                    score.score, score.trajectory_id
                ),
            });
        }
    }

    if seen.len() != expected.len() {
        return Err(Error::IncompleteScoring {
            window_id: window_id.to_string(),
            expected: expected.len(),
            received: seen.len(),
        });
    }

    let mut entries = Vec::with_capacity(examples.len());
    for example in examples {
        let score = scores
            .iter()
            .find(|s| s.trajectory_id == example.metadata.trajectory_id)
            .ok_or_else(|| Error::IncompleteScoring {
                window_id: window_id.to_string(),
                expected: expected.len(),
                received: seen.len(),
            })?;
        entries.push(ScoredTrajectory {
            trajectory_id: example.metadata.trajectory_id,
            agent_id: example.metadata.agent_id.clone(),
            score: score.score,
            justification: score.justification.clone(),
        });
    }

    Ok(ScoredGroup {
        window_id: window_id.to_string(),
        entries,
    })
}

/// Heuristic fallback: min-max normalize final outcomes across the cohort.
fn fallback_group(window_id: &str, examples: &[TrainingExample]) -> ScoredGroup {
    let outcomes: Vec<f64> = examples
        .iter()
        .map(|e| e.metadata.final_outcome.to_f64().unwrap_or(0.0))
        .collect();
    let min = outcomes.iter().copied().fold(f64::INFINITY, f64::min);
    let max = outcomes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;

    let entries = examples
        .iter()
        .zip(&outcomes)
        .map(|(example, outcome)| ScoredTrajectory {
            trajectory_id: example.metadata.trajectory_id,
            agent_id: example.metadata.agent_id.clone(),
            score: if span > 0.0 { (outcome - min) / span } else { 0.5 },
            justification: "fallback: ranked by final outcome, judge unavailable".to_string(),
        })
        .collect();

    ScoredGroup {
        window_id: window_id.to_string(),
        entries,
    }
}

fn render_transcript(example: &TrainingExample) -> String {
    let mut out = String::new();
    for message in &example.messages {
        let label = match message.role {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "AGENT",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }
    out
}
