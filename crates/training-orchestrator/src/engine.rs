//! Training engine client seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use training_core::retry::{with_backoff, BackoffPolicy};
use training_core::types::{ScoredTrajectory, TrainingExample};
use training_core::{Error, Result};

/// One scored cohort inside a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionGroup {
    pub window_id: String,
    pub examples: Vec<TrainingExample>,
    /// One score per example, same order.
    pub scores: Vec<ScoredTrajectory>,
}

/// The full payload handed to the training engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSubmission {
    pub base_model: String,
    pub hyperparameters: Value,
    pub groups: Vec<SubmissionGroup>,
}

/// Reported state of a submitted training job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Completed { checkpoint: String },
    Failed { reason: String },
}

#[async_trait]
pub trait TrainingEngine: Send + Sync {
    /// Submit a batch; returns the engine's job handle on acceptance.
    async fn submit(&self, submission: &TrainingSubmission) -> Result<String>;

    /// Current status of a previously submitted job.
    async fn poll(&self, job_id: &str) -> Result<JobStatus>;
}

#[derive(Debug, Deserialize)]
struct SubmitApiResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct JobApiResponse {
    status: String,
    checkpoint: Option<String>,
    reason: Option<String>,
}

/// HTTP client for an external training service.
pub struct HttpTrainingEngine {
    client: reqwest::Client,
    base_url: String,
    backoff: BackoffPolicy,
}

impl HttpTrainingEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff_policy(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl TrainingEngine for HttpTrainingEngine {
    async fn submit(&self, submission: &TrainingSubmission) -> Result<String> {
        let url = format!("{}/v1/jobs", self.base_url);
        let response = with_backoff(&self.backoff, "engine_submit", || async {
            let resp = self.client.post(&url).json(submission).send().await?;
            if !resp.status().is_success() {
                return Err(Error::Engine {
                    message: format!("engine returned HTTP {}", resp.status()),
                });
            }
            let parsed: SubmitApiResponse = resp.json().await?;
            Ok(parsed)
        })
        .await?;

        Ok(response.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus> {
        let url = format!("{}/v1/jobs/{}", self.base_url, job_id);
        let response = with_backoff(&self.backoff, "engine_poll", || async {
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(Error::Engine {
                    message: format!("engine returned HTTP {}", resp.status()),
                });
            }
            let parsed: JobApiResponse = resp.json().await?;
            Ok(parsed)
        })
        .await?;

        match response.status.as_str() {
            "running" | "queued" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed {
                checkpoint: response.checkpoint.ok_or_else(|| Error::Engine {
                    message: format!("job {job_id} completed without a checkpoint"),
                })?,
            }),
            "failed" => Ok(JobStatus::Failed {
                reason: response
                    .reason
                    .unwrap_or_else(|| "no reason reported".to_string()),
            }),
            other => Err(Error::Engine {
                message: format!("job {job_id} reported unknown status {other:?}"),
            }),
        }
    }
}
