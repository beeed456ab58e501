//! Configuration management for the cohort training pipeline.

use std::env;

use serde::Deserialize;

use crate::{Error, Result};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub judge: JudgeConfig,
    pub engine: EngineConfig,
    pub training: TrainingConfig,
    pub deployment: DeploymentConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JudgeConfig {
    pub base_url: String,
    /// Judge model identifier passed through to the scoring service.
    pub model: String,
    /// Opt-in local heuristic fallback when the judge is down. Off by
    /// default; substituting heuristic scores silently would mask judge
    /// outages.
    pub fallback_enabled: bool,
    /// Cap on concurrent judge calls across windows.
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub base_url: String,
    pub base_model: String,
    pub learning_rate: f64,
}

/// Policy knobs for cohort eligibility and data sampling. The source
/// deployments disagree on the right values, so none of these are
/// hard-coded elsewhere.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Minimum distinct agents for a window to form a scoreable cohort.
    pub min_agents_per_window: i64,
    pub lookback_hours: i64,
    /// Readiness: minimum unused trajectories across the store.
    pub min_trajectories: u64,
    /// Readiness: minimum eligible cohorts.
    pub min_eligible_windows: usize,
    /// How many unused trajectories to sample for the data-quality check.
    pub quality_sample_size: usize,
    /// Dropout target: desired number of trajectories per training run.
    pub dropout_target: usize,
    /// Upper bound on the dropout rate.
    pub max_dropout: f64,
    /// Cap on trajectories sent to the judge per cohort.
    pub max_per_group: usize,
    /// Minimum cohort members after sampling for relative scoring.
    pub min_group_size: usize,
    /// Fixed RNG seed for reproducible sampling; None seeds from entropy.
    pub sample_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Rollout fraction applied when a new model is first staged.
    pub initial_rollout_pct: u8,
    /// Staging above this fraction requires an explicit promotion.
    pub max_stage_rollout_pct: u8,
    /// Score regression beyond this fraction triggers automatic rollback.
    pub regression_tolerance: f64,
    /// Root directory for version-qualified model artifacts.
    pub artifact_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub poll_interval_secs: u64,
    /// Ceiling on total wait for one training job before it is failed.
    pub max_poll_secs: u64,
    /// Consecutive poll errors tolerated before a training job is failed.
    pub max_poll_failures: usize,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| Error::Config {
                    message: "DATABASE_URL environment variable not set".to_string(),
                })?,
                max_connections: env_parsed("DATABASE_MAX_CONNECTIONS", 5),
            },
            judge: JudgeConfig {
                base_url: env::var("JUDGE_BASE_URL").map_err(|_| Error::Config {
                    message: "JUDGE_BASE_URL environment variable not set".to_string(),
                })?,
                model: env::var("JUDGE_MODEL")
                    .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
                fallback_enabled: env_parsed("JUDGE_FALLBACK_ENABLED", false),
                max_concurrency: env_parsed("JUDGE_MAX_CONCURRENCY", 4),
            },
            engine: EngineConfig {
                base_url: env::var("TRAINING_ENGINE_URL").map_err(|_| Error::Config {
                    message: "TRAINING_ENGINE_URL environment variable not set".to_string(),
                })?,
                base_model: env::var("BASE_MODEL")
                    .unwrap_or_else(|_| "Qwen/Qwen2.5-0.5B-Instruct".to_string()),
                learning_rate: env_parsed("LEARNING_RATE", 1e-5),
            },
            training: TrainingConfig {
                min_agents_per_window: env_parsed("MIN_AGENTS_PER_WINDOW", 2),
                lookback_hours: env_parsed("LOOKBACK_HOURS", 24),
                min_trajectories: env_parsed("MIN_TRAJECTORIES", 10),
                min_eligible_windows: env_parsed("MIN_ELIGIBLE_WINDOWS", 1),
                quality_sample_size: env_parsed("QUALITY_SAMPLE_SIZE", 10),
                dropout_target: env_parsed("DROPOUT_TARGET", 1000),
                max_dropout: env_parsed("MAX_DROPOUT", 0.3),
                max_per_group: env_parsed("MAX_PER_GROUP", 8),
                min_group_size: env_parsed("MIN_GROUP_SIZE", 2),
                sample_seed: env::var("SAMPLE_SEED").ok().and_then(|s| s.parse().ok()),
            },
            deployment: DeploymentConfig {
                initial_rollout_pct: env_parsed("INITIAL_ROLLOUT_PCT", 10),
                max_stage_rollout_pct: env_parsed("MAX_STAGE_ROLLOUT_PCT", 50),
                regression_tolerance: env_parsed("REGRESSION_TOLERANCE", 0.05),
                artifact_dir: env::var("MODEL_ARTIFACT_DIR")
                    .unwrap_or_else(|_| "./model-artifacts".to_string()),
            },
            scheduler: SchedulerConfig {
                interval_secs: env_parsed("SCHEDULER_INTERVAL_SECS", 3600),
                poll_interval_secs: env_parsed("POLL_INTERVAL_SECS", 30),
                max_poll_secs: env_parsed("MAX_POLL_SECS", 7200),
                max_poll_failures: env_parsed("MAX_POLL_FAILURES", 5),
            },
        })
    }

    /// Load configuration for testing (with defaults).
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/cohort_pipeline_test".to_string(),
                max_connections: 2,
            },
            judge: JudgeConfig {
                base_url: "http://localhost:9400".to_string(),
                model: "stub-judge".to_string(),
                fallback_enabled: false,
                max_concurrency: 2,
            },
            engine: EngineConfig {
                base_url: "http://localhost:9500".to_string(),
                base_model: "test-base".to_string(),
                learning_rate: 1e-5,
            },
            training: TrainingConfig {
                min_agents_per_window: 2,
                lookback_hours: 24,
                min_trajectories: 2,
                min_eligible_windows: 1,
                quality_sample_size: 5,
                dropout_target: 100,
                max_dropout: 0.3,
                max_per_group: 8,
                min_group_size: 2,
                sample_seed: Some(42),
            },
            deployment: DeploymentConfig {
                initial_rollout_pct: 10,
                max_stage_rollout_pct: 50,
                regression_tolerance: 0.05,
                artifact_dir: "/tmp/model-artifacts-test".to_string(),
            },
            scheduler: SchedulerConfig {
                interval_secs: 60,
                poll_interval_secs: 1,
                max_poll_secs: 10,
                max_poll_failures: 3,
            },
        }
    }
}
