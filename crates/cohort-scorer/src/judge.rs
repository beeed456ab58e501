//! Judge client seam.
//!
//! The judge sees an entire cohort in one request so it can rank the
//! trajectories against each other rather than against an absolute bar.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use training_core::retry::{with_backoff, BackoffPolicy};
use training_core::{Error, Result};

/// One trajectory presented to the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeCandidate {
    pub trajectory_id: Uuid,
    pub agent_id: String,
    pub final_outcome: Decimal,
    /// The reconstructed session transcript, including the ground-truth
    /// context in its system message.
    pub transcript: String,
}

/// A full-cohort scoring request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub window_id: String,
    pub rubric: String,
    pub candidates: Vec<JudgeCandidate>,
}

/// One relative score returned by the judge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeScore {
    pub trajectory_id: Uuid,
    /// Cohort-relative score in `[0, 1]`.
    pub score: f64,
    pub justification: String,
}

#[async_trait]
pub trait Judge: Send + Sync {
    /// Score a complete cohort. Implementations return one entry per
    /// candidate; the scorer enforces that.
    async fn score(&self, request: &JudgeRequest) -> Result<Vec<JudgeScore>>;
}

#[derive(Debug, Serialize)]
struct ScoreApiRequest<'a> {
    model: &'a str,
    window_id: &'a str,
    rubric: &'a str,
    candidates: &'a [JudgeCandidate],
}

#[derive(Debug, Deserialize)]
struct ScoreApiResponse {
    scores: Vec<JudgeScore>,
}

/// HTTP judge backed by a scoring service.
pub struct HttpJudge {
    client: reqwest::Client,
    base_url: String,
    model: String,
    backoff: BackoffPolicy,
}

impl HttpJudge {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff_policy(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn score(&self, request: &JudgeRequest) -> Result<Vec<JudgeScore>> {
        let url = format!("{}/v1/score", self.base_url);
        let body = ScoreApiRequest {
            model: &self.model,
            window_id: &request.window_id,
            rubric: &request.rubric,
            candidates: &request.candidates,
        };

        let response = with_backoff(&self.backoff, "judge_score", || async {
            let resp = self.client.post(&url).json(&body).send().await?;
            if !resp.status().is_success() {
                return Err(Error::Judge {
                    message: format!("judge returned HTTP {}", resp.status()),
                });
            }
            let parsed: ScoreApiResponse = resp.json().await?;
            Ok(parsed)
        })
        .await?;

        Ok(response.scores)
    }
}
