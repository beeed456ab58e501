//! Ground-truth outcome context for a window.
//!
//! This is what the market actually did during the hour, which the agents
//! could not know at decision time. It is handed to the judge as context and
//! is never folded into per-step rewards.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Volatility {
    High,
    Medium,
    Low,
}

/// What one traded asset actually did over the window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetOutcome {
    pub symbol: String,
    pub start_price: Decimal,
    pub end_price: Decimal,
    pub change_pct: Decimal,
    pub sentiment: Option<Sentiment>,
    pub headlines: Vec<String>,
}

/// All observed outcomes for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruth {
    pub window_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub assets: BTreeMap<String, AssetOutcome>,
    pub overall_trend: Option<Sentiment>,
    pub volatility: Option<Volatility>,
}

impl GroundTruth {
    /// Render the outcomes as judge-readable context prose.
    pub fn as_context(&self) -> String {
        let mut out = String::new();
        for outcome in self.assets.values() {
            out.push_str(&format!(
                "\n{}:\n  Price: {} -> {} ({:+}%)",
                outcome.symbol, outcome.start_price, outcome.end_price, outcome.change_pct
            ));
            if let Some(sentiment) = outcome.sentiment {
                out.push_str(&format!("\n  Sentiment: {sentiment:?}"));
            }
            if let Some(headline) = outcome.headlines.first() {
                out.push_str(&format!("\n  News: {headline}"));
            }
        }
        if let Some(trend) = self.overall_trend {
            out.push_str(&format!("\nOverall trend: {trend:?}"));
        }
        out
    }
}
