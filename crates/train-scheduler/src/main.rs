//! Train Scheduler
//!
//! Automation loop for the cohort training pipeline: submits training runs
//! when enough fresh data has accumulated, tracks the engine job, and
//! registers, stages, and promotes the resulting model.

mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cohort_scorer::{CohortScorer, HttpJudge, ScorerConfig};
use data_bridge::{CohortGrouper, ContextConverter, ConverterConfig};
use model_registry::{DeploymentController, FsArtifactStore, ModelRegistry};
use training_core::config::Config;
use training_core::db::{
    batches::BatchRepository, create_pool, models::ModelRepository, outcomes::OutcomeRepository,
    run_migrations, trajectories::TrajectoryRepository,
};
use training_core::window::SystemClock;
use training_orchestrator::{HttpTrainingEngine, OrchestratorConfig, TrainingOrchestrator};

use scheduler::AutomationScheduler;

#[derive(Parser)]
#[command(name = "train-scheduler")]
#[command(about = "Continuous cohort training automation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run training cycles continuously on the configured interval
    Run,
    /// Run exactly one training cycle and exit
    Once,
    /// Train one specific window immediately, bypassing the readiness gate
    ForceWindow {
        /// Window id in the form 2025-01-01T09:00
        window_id: String,
    },
    /// Roll the active model back to its predecessor
    Rollback {
        #[arg(long, default_value = "manual rollback")]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "train_scheduler=info,training_core=info,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Train Scheduler");

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    let trajectories = Arc::new(TrajectoryRepository::new(pool.clone()));
    let outcomes = Arc::new(OutcomeRepository::new(pool.clone()));
    let batches = Arc::new(BatchRepository::new(pool.clone()));
    let models = Arc::new(ModelRepository::new(pool));
    let clock = Arc::new(SystemClock);

    let judge = Arc::new(HttpJudge::new(
        config.judge.base_url.clone(),
        config.judge.model.clone(),
    ));
    let engine = Arc::new(HttpTrainingEngine::new(config.engine.base_url.clone()));

    let grouper = CohortGrouper::new(trajectories.clone(), clock.clone());
    let orchestrator = TrainingOrchestrator::new(
        trajectories,
        outcomes,
        batches.clone(),
        engine,
        grouper,
        ContextConverter::new(ConverterConfig {
            dropout_target: config.training.dropout_target,
            max_dropout: config.training.max_dropout,
            max_per_group: config.training.max_per_group,
            min_group_size: config.training.min_group_size,
            seed: config.training.sample_seed,
        })?,
        CohortScorer::new(
            judge,
            ScorerConfig {
                fallback_enabled: config.judge.fallback_enabled,
                ..Default::default()
            },
        ),
        clock.clone(),
        OrchestratorConfig {
            training: config.training.clone(),
            engine: config.engine.clone(),
            poll_interval: Duration::from_secs(config.scheduler.poll_interval_secs),
            max_poll: Duration::from_secs(config.scheduler.max_poll_secs),
            max_poll_failures: config.scheduler.max_poll_failures,
            max_concurrent_scoring: config.judge.max_concurrency,
        },
    );

    let registry = ModelRegistry::new(
        models.clone(),
        Arc::new(FsArtifactStore::new(config.deployment.artifact_dir.clone())),
        clock.clone(),
    );
    let deployer = DeploymentController::new(models.clone(), clock, config.deployment.clone());

    let scheduler = AutomationScheduler::new(
        orchestrator,
        registry,
        deployer,
        batches,
        models,
        Duration::from_secs(config.scheduler.interval_secs),
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            scheduler.run_forever().await?;
        }
        Command::Once => {
            let report = scheduler.run_once().await?;
            info!(outcome = ?report.outcome, detail = %report.detail, "Cycle finished");
        }
        Command::ForceWindow { window_id } => {
            let report = scheduler.force_window(&window_id).await?;
            info!(
                window_id = %window_id,
                outcome = ?report.outcome,
                detail = %report.detail,
                "Forced window cycle finished"
            );
        }
        Command::Rollback { reason } => match scheduler.rollback(&reason).await? {
            Some(model) => info!(version = %model.version, "Restored previous active model"),
            None => info!("Active model rolled back, no predecessor to restore"),
        },
    }

    Ok(())
}
