use crate::api::{ApiClient, ApiError};
use crate::models::{BackendHealth, MarketQuote};
use crate::store::{DashboardStore, HealthStatus};
use crate::task::PollHandle;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{info, warn};

pub const DEFAULT_MARKET_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Debug, PartialEq)]
pub enum RefreshOutcome {
    Updated,
    /// The fetch failed; the previous summary (if any) is still displayed.
    KeptPrevious(String),
    /// Another refresh was already in flight; nothing was requested.
    Skipped,
}

/// Periodically refreshes the market summary, independent of the simulation.
#[derive(Clone, Debug)]
pub struct MarketPoller {
    client: ApiClient,
    store: DashboardStore,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight markers even when the refresh future is dropped mid-request.
struct InFlightGuard<'a>(&'a MarketPoller);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store.update(|s| s.market.refreshing = false);
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

impl MarketPoller {
    pub fn new(client: ApiClient, store: DashboardStore, interval: Duration) -> Self {
        Self {
            client,
            store,
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fetches once immediately, then every `interval` until the handle is
    /// cancelled or dropped.
    pub fn spawn(&self) -> PollHandle {
        let poller = self.clone();
        PollHandle::spawn(move |cancel| async move {
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if cancel.is_cancelled() {
                    break;
                }
                poller.refresh().await;
            }
        })
    }

    /// Shared by the timer and manual refresh.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return RefreshOutcome::Skipped;
        }
        let _guard = InFlightGuard(self);
        self.store.update(|s| s.market.refreshing = true);

        match self.client.get_market_summary().await {
            Ok(summary) => {
                self.store.update(|state| {
                    let market = &mut state.market;
                    market.summary = Some(summary);
                    market.last_updated = Some(Utc::now());
                    market.last_error = None;
                    market.consecutive_failures = 0;
                });
                RefreshOutcome::Updated
            }
            Err(e) => {
                let message = e.message().to_string();
                let failures = self
                    .store
                    .update(|state| {
                        let market = &mut state.market;
                        market.last_error = Some(message.clone());
                        market.consecutive_failures += 1;
                        market.consecutive_failures
                    })
                    .unwrap_or(0);
                warn!("Market refresh failed ({} in a row): {}", failures, e);
                RefreshOutcome::KeptPrevious(message)
            }
        }
    }

    pub async fn check_health(&self) -> Result<BackendHealth, ApiError> {
        match self.client.get_health().await {
            Ok(health) => {
                info!(
                    "Backend {}: model_loaded={} running={}",
                    health.status, health.model_loaded, health.running
                );
                self.store
                    .update(|s| s.health = HealthStatus::Online(health.clone()));
                Ok(health)
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
                self.store
                    .update(|s| s.health = HealthStatus::Unreachable(e.message().to_string()));
                Err(e)
            }
        }
    }

    pub async fn quotes(&self, symbols: &[String]) -> Result<Vec<MarketQuote>, ApiError> {
        self.client.get_quotes(symbols).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<String>, ApiError> {
        self.client.search_symbols(query).await
    }
}
