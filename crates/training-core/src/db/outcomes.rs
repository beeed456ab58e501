//! Database operations for observed window outcomes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::store::OutcomeStore;
use crate::types::{AssetOutcome, GroundTruth};
use crate::window;
use crate::Result;

/// Repository for per-window market outcome rows written by the simulation.
pub struct OutcomeRepository {
    pool: PgPool,
}

impl OutcomeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutcomeStore for OutcomeRepository {
    async fn ground_truth(&self, window_id: &str) -> Result<Option<GroundTruth>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, start_price, end_price, change_pct, sentiment, headlines
            FROM window_outcomes
            WHERE window_id = $1 AND symbol IS NOT NULL
            "#,
        )
        .bind(window_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let (window_start, window_end) = window::window_bounds(window_id)?;

        let mut assets = BTreeMap::new();
        for r in &rows {
            let symbol: String = r.get("symbol");
            let sentiment = r
                .get::<Option<String>, _>("sentiment")
                .and_then(|s| serde_json::from_str(&format!("\"{s}\"")).ok());
            let headlines: Vec<String> = r
                .get::<Option<String>, _>("headlines")
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default();

            assets.insert(
                symbol.clone(),
                AssetOutcome {
                    symbol,
                    start_price: r.get("start_price"),
                    end_price: r.get("end_price"),
                    change_pct: r.get("change_pct"),
                    sentiment,
                    headlines,
                },
            );
        }

        Ok(Some(GroundTruth {
            window_id: window_id.to_string(),
            window_start,
            window_end,
            assets,
            overall_trend: None,
            volatility: None,
        }))
    }
}
