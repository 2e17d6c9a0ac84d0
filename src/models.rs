use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display names for the weight vector, in the order the backend emits them.
pub const ASSET_NAMES: &[&str] = &[
    "BTC", "ETH", "SPY", "QQQ", "GLD", "TLT", "USD", "AAPL", "MSFT", "GOOGL",
];

/// Allocations under this share (in percent) are left out of the breakdown.
const MIN_ALLOCATION_PCT: f64 = 1.0;

/// One server-reported simulation state at a given step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub step: u64,
    pub portfolio_value: f64,
    pub drawdown: f64,
    pub volatility: f64,
    pub turnover: f64,
    /// One weight per tracked asset; the cash residual means these need not sum to 1.
    pub weights: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
}

impl SimulationSnapshot {
    /// The server only ever asserts `running: false`; absence means "no opinion".
    pub fn reports_stopped(&self) -> bool {
        self.running == Some(false)
    }

    pub fn cash_residual(&self) -> f64 {
        1.0 - self.weights.iter().sum::<f64>()
    }

    /// Named allocations in percent, dropping slivers. With no weights yet the
    /// whole portfolio is shown as cash.
    pub fn allocations(&self) -> Vec<(String, f64)> {
        if self.weights.is_empty() {
            return vec![("Cash".to_string(), 100.0)];
        }
        self.weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let name = ASSET_NAMES
                    .get(i)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("Asset {}", i));
                (name, w * 100.0)
            })
            .filter(|(_, pct)| *pct > MIN_ALLOCATION_PCT)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    pub model_loaded: bool,
    pub running: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    #[serde(rename = "changePercent")]
    pub change_percent: f64,
    pub volume: u64,
    pub high: f64,
    pub low: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    #[serde(default)]
    pub indices: Vec<MarketQuote>,
    #[serde(default)]
    pub watchlist: Vec<MarketQuote>,
    #[serde(default)]
    pub gainers: Vec<MarketQuote>,
    #[serde(default)]
    pub losers: Vec<MarketQuote>,
    #[serde(default)]
    pub sp500: Option<MarketQuote>,
    pub timestamp: String,
}

impl MarketSummary {
    /// The backend emits naive UTC ISO-8601 with a trailing `Z`.
    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub message: &'a str,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolSearch {
    #[serde(default)]
    pub symbols: Vec<String>,
}
