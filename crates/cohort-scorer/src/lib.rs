//! Cohort Scorer
//!
//! Sends complete window cohorts to an LLM judge and validates the relative
//! scores that come back. Scoring is all-or-nothing per cohort; a partial
//! result would silently bias the relative comparison.

mod judge;
mod scorer;

pub use judge::{HttpJudge, Judge, JudgeCandidate, JudgeRequest, JudgeScore};
pub use scorer::{CohortScorer, ScorerConfig, DEFAULT_RUBRIC};
