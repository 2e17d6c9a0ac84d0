use crate::api::{ApiClient, ApiError};
use crate::config::DashboardConfig;
use crate::market::MarketPoller;
use crate::simulation::SimulationOrchestrator;
use crate::store::{DashboardReader, DashboardStore};
use crate::task::PollHandle;
use tracing::{debug, info};

/// Owns everything that lives for one dashboard session: the state store,
/// the simulation orchestrator, the market poller and their background tasks.
/// Dropping it tears all of them down and detaches every reader.
pub struct Dashboard {
    client: ApiClient,
    store: DashboardStore,
    simulation: SimulationOrchestrator,
    market: MarketPoller,
    market_poll: Option<PollHandle>,
    initial_load: Option<PollHandle>,
}

impl Dashboard {
    /// Builds the components without starting any background work.
    pub fn new(config: &DashboardConfig) -> Result<Self, ApiError> {
        let client = ApiClient::new(&config.base_url)?;
        let store = DashboardStore::new(config.history_capacity);
        let simulation =
            SimulationOrchestrator::new(client.clone(), store.clone(), config.step_interval);
        let market = MarketPoller::new(client.clone(), store.clone(), config.market_interval);
        Ok(Self {
            client,
            store,
            simulation,
            market,
            market_poll: None,
            initial_load: None,
        })
    }

    /// Builds the dashboard, loads the current simulation state and backend
    /// health once, and starts the market poll.
    pub fn mount(config: &DashboardConfig) -> Result<Self, ApiError> {
        let mut dashboard = Self::new(config)?;
        info!(
            "Mounting dashboard against {} (step every {:?}, market every {:?}, history {})",
            config.base_url, config.step_interval, config.market_interval, config.history_capacity
        );

        let simulation = dashboard.simulation.clone();
        let market = dashboard.market.clone();
        dashboard.initial_load = Some(PollHandle::spawn(move |_cancel| async move {
            let _ = simulation.load_initial().await;
            if let Err(e) = simulation.fetch_server_history().await {
                debug!("No server history available: {}", e);
            }
            let _ = market.check_health().await;
        }));
        dashboard.market_poll = Some(dashboard.market.spawn());
        Ok(dashboard)
    }

    pub fn reader(&self) -> DashboardReader {
        self.store.reader()
    }

    pub fn simulation(&self) -> &SimulationOrchestrator {
        &self.simulation
    }

    pub fn market(&self) -> &MarketPoller {
        &self.market
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.simulation.stop();
        if let Some(handle) = self.market_poll.take() {
            handle.cancel();
        }
        if let Some(handle) = self.initial_load.take() {
            handle.cancel();
        }
        self.store.close();
        info!("Dashboard unmounted");
    }
}
