use crate::history::SimulationHistory;
use crate::models::{BackendHealth, MarketSummary, SimulationSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::watch;

/// Starting capital the backend resets every simulation to.
pub const INITIAL_PORTFOLIO_VALUE: f64 = 1_000_000.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Stopped,
    Running,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Running => "Running",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Online(BackendHealth),
    Unreachable(String),
}

#[derive(Clone, Debug)]
pub struct SimulationView {
    pub snapshot: Option<SimulationSnapshot>,
    pub history: SimulationHistory,
    pub run_state: RunState,
    pub last_error: Option<String>,
    /// Server-side history, only populated as a fallback while the local buffer is empty.
    pub server_history: Vec<SimulationSnapshot>,
    pub(crate) generation: u64,
}

impl SimulationView {
    fn new(history_capacity: usize) -> Self {
        Self {
            snapshot: None,
            history: SimulationHistory::new(history_capacity),
            run_state: RunState::Stopped,
            last_error: None,
            server_history: Vec::new(),
            generation: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    pub fn portfolio_value(&self) -> f64 {
        self.snapshot
            .as_ref()
            .map(|s| s.portfolio_value)
            .unwrap_or(INITIAL_PORTFOLIO_VALUE)
    }

    pub fn total_return_pct(&self) -> f64 {
        (self.portfolio_value() - INITIAL_PORTFOLIO_VALUE) / INITIAL_PORTFOLIO_VALUE * 100.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct MarketView {
    pub summary: Option<MarketSummary>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub refreshing: bool,
    pub consecutive_failures: u32,
}

impl MarketView {
    /// True when the displayed summary is older than the latest attempt.
    pub fn is_stale(&self) -> bool {
        self.summary.is_some() && self.last_error.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct DashboardState {
    pub simulation: SimulationView,
    pub market: MarketView,
    pub health: HealthStatus,
}

impl DashboardState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            simulation: SimulationView::new(history_capacity),
            market: MarketView::default(),
            health: HealthStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("dashboard state accessed after its dashboard was unmounted")]
    Detached,
}

#[derive(Debug)]
struct StoreInner {
    tx: watch::Sender<DashboardState>,
    detached: AtomicBool,
}

/// Writer side of the dashboard state. Only the orchestrator and the poller
/// hold one; everything else reads through a [`DashboardReader`].
#[derive(Clone, Debug)]
pub struct DashboardStore {
    inner: Arc<StoreInner>,
}

impl DashboardStore {
    pub fn new(history_capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(DashboardState::new(history_capacity));
        Self {
            inner: Arc::new(StoreInner {
                tx,
                detached: AtomicBool::new(false),
            }),
        }
    }

    pub fn reader(&self) -> DashboardReader {
        DashboardReader {
            inner: self.inner.clone(),
            rx: self.inner.tx.subscribe(),
        }
    }

    /// Applies `f` atomically with respect to readers. Returns `None` once the
    /// store is detached; nothing is written then.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut DashboardState) -> R) -> Option<R> {
        if self.is_detached() {
            return None;
        }
        let mut out = None;
        let detached = &self.inner.detached;
        self.inner.tx.send_modify(|state| {
            if !detached.load(Ordering::SeqCst) {
                out = Some(f(state));
            }
        });
        out
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&DashboardState) -> R) -> R {
        f(&*self.inner.tx.borrow())
    }

    /// Detaches every reader. Waiting readers are woken so they observe it.
    pub(crate) fn close(&self) {
        if !self.inner.detached.swap(true, Ordering::SeqCst) {
            self.inner.tx.send_modify(|_| {});
        }
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }
}

/// Read-only view handed to consumers. Reads fail with
/// [`StoreError::Detached`] once the owning dashboard is gone.
#[derive(Clone, Debug)]
pub struct DashboardReader {
    inner: Arc<StoreInner>,
    rx: watch::Receiver<DashboardState>,
}

impl DashboardReader {
    fn check(&self) -> Result<(), StoreError> {
        if self.inner.detached.load(Ordering::SeqCst) {
            Err(StoreError::Detached)
        } else {
            Ok(())
        }
    }

    pub fn current(&self) -> Result<DashboardState, StoreError> {
        self.with(DashboardState::clone)
    }

    pub fn with<R>(&self, f: impl FnOnce(&DashboardState) -> R) -> Result<R, StoreError> {
        self.check()?;
        Ok(f(&*self.rx.borrow()))
    }

    pub async fn changed(&mut self) -> Result<(), StoreError> {
        self.check()?;
        self.rx.changed().await.map_err(|_| StoreError::Detached)?;
        self.check()
    }

    /// Resolves with the first state (current or future) matching `pred`.
    pub async fn wait_for(
        &mut self,
        mut pred: impl FnMut(&DashboardState) -> bool,
    ) -> Result<DashboardState, StoreError> {
        loop {
            self.check()?;
            {
                let state = self.rx.borrow_and_update();
                if pred(&*state) {
                    return Ok(state.clone());
                }
            }
            self.rx.changed().await.map_err(|_| StoreError::Detached)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_stopped_and_empty() {
        let store = DashboardStore::new(100);
        let state = store.reader().current().unwrap();
        assert_eq!(state.simulation.run_state, RunState::Stopped);
        assert!(state.simulation.snapshot.is_none());
        assert_eq!(state.simulation.history.capacity(), 100);
        assert_eq!(state.simulation.portfolio_value(), INITIAL_PORTFOLIO_VALUE);
        assert_eq!(state.health, HealthStatus::Unknown);
        assert!(state.market.summary.is_none());
    }

    #[test]
    fn reads_fail_after_close() {
        let store = DashboardStore::new(10);
        let reader = store.reader();
        store.close();
        assert_eq!(reader.current().unwrap_err(), StoreError::Detached);
        assert!(store.update(|s| s.simulation.run_state = RunState::Running).is_none());
    }

    #[tokio::test]
    async fn waiting_reader_observes_detach() {
        let store = DashboardStore::new(10);
        let mut reader = store.reader();
        let waiter = tokio::spawn(async move {
            reader
                .wait_for(|s| s.simulation.is_running())
                .await
                .map(|_| ())
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.close();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(StoreError::Detached));
    }

    #[tokio::test]
    async fn readers_see_writes() {
        let store = DashboardStore::new(10);
        let mut reader = store.reader();
        store.update(|s| s.simulation.run_state = RunState::Running);
        reader.changed().await.unwrap();
        assert!(reader.with(|s| s.simulation.is_running()).unwrap());
    }
}
