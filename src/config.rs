use crate::api::DEFAULT_BASE_URL;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::market::DEFAULT_MARKET_INTERVAL_SECS;
use crate::simulation::DEFAULT_STEP_INTERVAL_MS;
use std::time::Duration;
use tracing::warn;

pub const BASE_URL_ENV: &str = "AEGRIS_API_BASE_URL";
/// Name the web front end used; still honoured so one `.env` serves both.
pub const LEGACY_BASE_URL_ENV: &str = "NEXT_PUBLIC_API_BASE_URL";
pub const STEP_INTERVAL_ENV: &str = "AEGRIS_STEP_INTERVAL_MS";
pub const MARKET_INTERVAL_ENV: &str = "AEGRIS_MARKET_INTERVAL_SECS";
pub const HISTORY_CAPACITY_ENV: &str = "AEGRIS_HISTORY_CAPACITY";

/// Log file used while the TUI owns the terminal.
pub const TUI_LOG_FILE: &str = "aegris-dashboard.log";

#[derive(Clone, Debug, PartialEq)]
pub struct DashboardConfig {
    pub base_url: String,
    pub step_interval: Duration,
    pub market_interval: Duration,
    pub history_capacity: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            step_interval: Duration::from_millis(DEFAULT_STEP_INTERVAL_MS),
            market_interval: Duration::from_secs(DEFAULT_MARKET_INTERVAL_SECS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset, blank, unparseable, or
    /// zero values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_blank = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let base_url = non_blank(BASE_URL_ENV)
            .or_else(|| non_blank(LEGACY_BASE_URL_ENV))
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);

        let step_ms = parse_positive(STEP_INTERVAL_ENV, non_blank(STEP_INTERVAL_ENV))
            .unwrap_or(DEFAULT_STEP_INTERVAL_MS);
        let market_secs = parse_positive(MARKET_INTERVAL_ENV, non_blank(MARKET_INTERVAL_ENV))
            .unwrap_or(DEFAULT_MARKET_INTERVAL_SECS);
        let capacity = parse_positive(HISTORY_CAPACITY_ENV, non_blank(HISTORY_CAPACITY_ENV))
            .map(|v| v as usize)
            .unwrap_or(defaults.history_capacity);

        Self {
            base_url,
            step_interval: Duration::from_millis(step_ms),
            market_interval: Duration::from_secs(market_secs),
            history_capacity: capacity,
        }
    }
}

fn parse_positive(key: &str, raw: Option<String>) -> Option<u64> {
    let raw = raw?;
    match raw.parse::<u64>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            warn!("Ignoring {}={} ; expected a positive integer", key, raw);
            None
        }
    }
}
