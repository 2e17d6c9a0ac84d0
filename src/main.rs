mod api;
mod app;
mod chat;
mod config;
mod dashboard;
mod history;
mod market;
mod models;
mod simulation;
mod store;
mod task;
mod tui;
mod ui;

#[cfg(test)]
mod mock_backend;

use anyhow::Context;
use api::ApiClient;
use app::App;
use chat::{ChatOutcome, ChatSession};
use clap::Parser;
use config::DashboardConfig;
use dashboard::Dashboard;
use models::SimulationSnapshot;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "AEGRIS dashboard: terminal front end for the AEGRIS portfolio simulation backend",
    after_help = "EXAMPLES:
    # Interactive dashboard against a local backend
    cargo run --release

    # Check backend health
    cargo run --release -- --health

    # Run a headless simulation for 50 steps
    cargo run --release -- --watch --max-steps 50

    # Ask the assistant
    cargo run --release -- --chat \"How is AAPL doing?\"

    # Look up quotes
    cargo run --release -- --quotes AAPL,MSFT,SPY

    # Search symbols
    cargo run --release -- --search btc"
)]
struct Args {
    /// Backend base URL (overrides AEGRIS_API_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Milliseconds between simulation steps (overrides AEGRIS_STEP_INTERVAL_MS)
    #[arg(long)]
    step_interval_ms: Option<u64>,

    /// Seconds between market refreshes (overrides AEGRIS_MARKET_INTERVAL_SECS)
    #[arg(long)]
    market_interval_secs: Option<u64>,

    /// Snapshots kept in the rolling history (overrides AEGRIS_HISTORY_CAPACITY)
    #[arg(long)]
    history_capacity: Option<usize>,

    /// Check backend health and exit
    #[arg(long)]
    health: bool,

    /// Start a simulation without the TUI and log every snapshot
    #[arg(long)]
    watch: bool,

    /// Stop a --watch run after this many steps
    #[arg(long)]
    max_steps: Option<u64>,

    /// Send one chat message and log the reply
    #[arg(long)]
    chat: Option<String>,

    /// Comma-separated symbols to quote (e.g., AAPL,MSFT,SPY)
    #[arg(long)]
    quotes: Option<String>,

    /// Search ticker symbols matching a query
    #[arg(long)]
    search: Option<String>,
}

impl Args {
    fn is_headless(&self) -> bool {
        self.health
            || self.watch
            || self.chat.is_some()
            || self.quotes.is_some()
            || self.search.is_some()
    }

    fn config(&self) -> DashboardConfig {
        let mut config = DashboardConfig::from_env();
        if let Some(url) = &self.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ms) = self.step_interval_ms.filter(|v| *v > 0) {
            config.step_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.market_interval_secs.filter(|v| *v > 0) {
            config.market_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = self.history_capacity.filter(|v| *v > 0) {
            config.history_capacity = capacity;
        }
        config
    }
}

fn init_tracing(to_file: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aegris_dashboard=info"));

    if to_file {
        // The TUI owns stdout/stderr, so logs go to a file instead.
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(config::TUI_LOG_FILE)
            .with_context(|| format!("failed to open {}", config::TUI_LOG_FILE))?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(!args.is_headless())?;
    let config = args.config();

    if args.health {
        let client = ApiClient::new(&config.base_url)?;
        match client.get_health().await {
            Ok(h) => info!(
                "Backend {} at {} (model_loaded={}, running={})",
                h.status, config.base_url, h.model_loaded, h.running
            ),
            Err(e) => error!("{}", e),
        }
        return Ok(());
    }

    if let Some(ref text) = args.chat {
        let client = ApiClient::new(&config.base_url)?;
        let mut session = ChatSession::new();
        match session.send(&client, text).await {
            ChatOutcome::Replied => {
                if let Some(reply) = session.messages().last() {
                    info!("Assistant: {}", reply.text);
                    if !reply.sources.is_empty() {
                        info!("Sources: {}", reply.sources.join(", "));
                    }
                }
            }
            ChatOutcome::Failed(e) => error!("{}", e),
            ChatOutcome::Ignored => warn!("Nothing to send; the message was blank."),
        }
        return Ok(());
    }

    if let Some(ref symbols_str) = args.quotes {
        let symbols: Vec<String> = symbols_str.split(',').map(str::to_string).collect();
        let dashboard = Dashboard::new(&config)?;
        match dashboard.market().quotes(&symbols).await {
            Ok(quotes) if quotes.is_empty() => warn!("No quotes returned for '{}'", symbols_str),
            Ok(quotes) => {
                for q in quotes {
                    info!(
                        "{:<8} {:>10.2} {:>+8.2} ({:+.2}%) vol {}",
                        q.symbol, q.price, q.change, q.change_percent, q.volume
                    );
                }
            }
            Err(e) => error!("{}", e),
        }
        return Ok(());
    }

    if let Some(ref query) = args.search {
        let dashboard = Dashboard::new(&config)?;
        match dashboard.market().search(query).await {
            Ok(symbols) if symbols.is_empty() => warn!("No symbols match '{}'", query),
            Ok(symbols) => info!("Matches: {}", symbols.join(", ")),
            Err(e) => error!("{}", e),
        }
        return Ok(());
    }

    if args.watch {
        return watch(&config, args.max_steps).await;
    }

    let dashboard = Dashboard::mount(&config)?;
    let mut terminal = tui::init()?;
    let mut app = App::new(dashboard);
    let res = app.run(&mut terminal).await;

    tui::restore()?;

    if let Err(e) = res {
        error!("Error: {:?}", e);
    }

    Ok(())
}

/// Headless run: start the simulation and log snapshots until it stops.
async fn watch(config: &DashboardConfig, max_steps: Option<u64>) -> anyhow::Result<()> {
    let dashboard = Dashboard::new(config)?;
    let simulation = dashboard.simulation().clone();
    let mut reader = dashboard.reader();

    let first = match simulation.start().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("{}", e);
            return Ok(());
        }
    };
    info!("Simulation started at step {} (${:.2})", first.step, first.portfolio_value);
    let mut last_logged = first;
    let mut logged_steps: u64 = 0;

    loop {
        tokio::select! {
            changed = reader.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping simulation.");
                simulation.stop();
                break;
            }
        }

        let state = reader.current()?;
        let sim = &state.simulation;
        // Wakeups coalesce, so walk the history rather than the latest snapshot.
        for snapshot in unlogged(sim.history.iter(), &last_logged) {
            log_snapshot(snapshot);
            last_logged = snapshot.clone();
            logged_steps += 1;
        }

        if !sim.is_running() {
            match &sim.last_error {
                Some(e) => error!("Simulation halted: {}", e),
                None => info!("Simulation finished at step {}", last_logged.step),
            }
            break;
        }

        if let Some(max) = max_steps {
            if logged_steps >= max {
                simulation.stop();
                info!("Reached {} steps; stopping.", max);
                break;
            }
        }
    }

    Ok(())
}

/// History entries not yet logged: later steps, or a newer value for the step
/// that was logged last.
fn unlogged<'a>(
    history: impl Iterator<Item = &'a SimulationSnapshot>,
    last_logged: &SimulationSnapshot,
) -> Vec<&'a SimulationSnapshot> {
    history
        .filter(|s| s.step > last_logged.step || (s.step == last_logged.step && *s != last_logged))
        .collect()
}

fn log_snapshot(snapshot: &SimulationSnapshot) {
    info!(
        "Step {:>5} | ${:.2} ({:+.2}%) | drawdown {:.2}% | vol {:.2}% | turnover {:.4}",
        snapshot.step,
        snapshot.portfolio_value,
        (snapshot.portfolio_value / store::INITIAL_PORTFOLIO_VALUE - 1.0) * 100.0,
        snapshot.drawdown * 100.0,
        snapshot.volatility * 100.0,
        snapshot.turnover,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::SimulationHistory;

    fn snap(step: u64, value: f64) -> SimulationSnapshot {
        SimulationSnapshot {
            step,
            portfolio_value: value,
            drawdown: 0.0,
            volatility: 0.0,
            turnover: 0.0,
            weights: vec![],
            running: Some(true),
        }
    }

    #[test]
    fn coalesced_updates_still_yield_every_new_step() {
        let mut history = SimulationHistory::new(10);
        let first = snap(0, 1_000_000.0);
        history.push(first.clone());
        history.push(snap(1, 1_002_000.0));
        history.push(snap(2, 1_004_000.0));
        history.push(snap(3, 1_006_000.0));

        let steps: Vec<u64> = unlogged(history.iter(), &first).iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
        assert!(unlogged(history.iter(), &snap(3, 1_006_000.0)).is_empty());
    }

    #[test]
    fn replaced_step_is_logged_again() {
        let mut history = SimulationHistory::new(10);
        let reset = snap(0, 1_000_000.0);
        history.push(reset.clone());
        history.push(snap(0, 1_003_500.0));

        let fresh = unlogged(history.iter(), &reset);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].portfolio_value, 1_003_500.0);
    }
}
