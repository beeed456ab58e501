//! Cohort Pipeline: Continuous RL Training for Autonomous Market Agents
//!
//! This is the root crate that ties the pipeline together for integration
//! tests. For actual functionality, use the individual crates directly:
//!
//! - `training-core`: Shared types, window math, config, store traits, Postgres layer
//! - `trajectory-recorder`: In-process capture of agent decision sessions
//! - `data-bridge`: Window cohort grouping and training-example conversion
//! - `cohort-scorer`: Cohort-relative scoring via an LLM judge
//! - `training-orchestrator`: Readiness checks, batch submission, job monitoring
//! - `model-registry`: Versioned model registration, staged deployment, rollback
//! - `train-scheduler`: The automation loop binary

pub use cohort_scorer as scorer;
pub use data_bridge as bridge;
pub use model_registry as registry;
pub use training_core as core;
pub use training_orchestrator as orchestrator;
pub use trajectory_recorder as recorder;
