//! Training Orchestrator
//!
//! Decides when enough cohort data has accumulated, assembles scored
//! training batches, submits them to the external training engine, and
//! tracks the job to completion. Trajectories are only marked consumed once
//! the engine reports success, so a failed run leaves the data available for
//! the next attempt.

mod engine;
mod orchestrator;

pub use engine::{
    HttpTrainingEngine, JobStatus, SubmissionGroup, TrainingEngine, TrainingSubmission,
};
pub use orchestrator::{batch_metrics, OrchestratorConfig, Readiness, TrainingOrchestrator};
