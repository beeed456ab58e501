//! Error types for the cohort training pipeline.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid window id: {0}")]
    InvalidWindowId(String),

    #[error("Data integrity error: {message}")]
    DataIntegrity { message: String },

    #[error("No open step for trajectory {trajectory_id}")]
    NoOpenStep { trajectory_id: Uuid },

    #[error("Unknown trajectory {trajectory_id}")]
    UnknownTrajectory { trajectory_id: Uuid },

    #[error("Persistence failed after {attempts} attempts: {message}")]
    Persistence { attempts: u32, message: String },

    #[error("Judge error: {message}")]
    Judge { message: String },

    #[error(
        "Incomplete scoring for window {window_id}: expected {expected} entries, got {received}"
    )]
    IncompleteScoring {
        window_id: String,
        expected: usize,
        received: usize,
    },

    #[error("Training engine error: {message}")]
    Engine { message: String },

    #[error("Policy violation: {message}")]
    PolicyViolation { message: String },

    #[error("Registry error: {message}")]
    Registry { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
