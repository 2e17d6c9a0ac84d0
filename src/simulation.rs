use crate::api::{ApiClient, ApiError};
use crate::history::PushOutcome;
use crate::models::SimulationSnapshot;
use crate::store::{DashboardStore, RunState, SimulationView};
use crate::task::PollHandle;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_STEP_INTERVAL_MS: u64 = 250;

/// What happened to one step response once it reached the store.
#[derive(Debug, PartialEq)]
enum StepApplied {
    Continue(PushOutcome),
    /// The server reported `running: false`.
    Finished(u64),
    Failed(String),
    /// The run this response belonged to is over.
    Discarded,
}

/// Drives the start / step / stop lifecycle of the backend simulation and
/// keeps the rolling history in the store current.
#[derive(Clone, Debug)]
pub struct SimulationOrchestrator {
    client: ApiClient,
    store: DashboardStore,
    step_interval: Duration,
    step_loop: Arc<Mutex<Option<PollHandle>>>,
}

impl SimulationOrchestrator {
    pub fn new(client: ApiClient, store: DashboardStore, step_interval: Duration) -> Self {
        Self {
            client,
            store,
            step_interval,
            step_loop: Arc::new(Mutex::new(None)),
        }
    }

    fn step_loop(&self) -> MutexGuard<'_, Option<PollHandle>> {
        self.step_loop.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn step_interval(&self) -> Duration {
        self.step_interval
    }

    pub fn run_state(&self) -> RunState {
        self.store.read(|s| s.simulation.run_state)
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// One-shot read of the current server state, so a dashboard opened
    /// mid-simulation shows the latest value before anything is started.
    pub async fn load_initial(&self) -> Result<SimulationSnapshot, ApiError> {
        let snapshot = match self.client.get_simulation_state().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Initial simulation load failed: {}", e);
                return Err(e);
            }
        };

        self.store.update(|state| {
            let sim = &mut state.simulation;
            if sim.is_running() {
                return;
            }
            sim.history.push(snapshot.clone());
            sim.snapshot = Some(snapshot.clone());
        });
        info!(
            "Loaded simulation state: step={} value={:.2}",
            snapshot.step, snapshot.portfolio_value
        );
        Ok(snapshot)
    }

    /// Resets the backend simulation and begins stepping. Calling this while
    /// already running restarts the run.
    pub async fn start(&self) -> Result<SimulationSnapshot, ApiError> {
        self.stop();
        let requested_at = self.store.read(|s| s.simulation.generation);

        let first = match self.client.start_simulation().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Start failed: {}", e);
                self.store
                    .update(|s| s.simulation.last_error = Some(e.to_string()));
                return Err(e);
            }
        };

        // Held until the loop is installed, so a concurrent stop() either
        // supersedes this start or finds and cancels the new loop.
        let mut step_loop = self.step_loop();
        let generation = self.store.update(|state| {
            let sim = &mut state.simulation;
            // A stop (or another start) landed while the request was pending.
            if sim.generation != requested_at {
                return None;
            }
            sim.generation += 1;
            sim.history.clear();
            sim.server_history.clear();
            sim.history.push(first.clone());
            sim.snapshot = Some(first.clone());
            sim.last_error = None;
            if first.reports_stopped() {
                sim.run_state = RunState::Stopped;
                return None;
            }
            sim.run_state = RunState::Running;
            Some(sim.generation)
        });

        let Some(generation) = generation.flatten() else {
            info!("Simulation start did not begin a run (superseded or not running)");
            return Ok(first);
        };

        info!(
            "Simulation started: step={} value={:.2}, stepping every {:?}",
            first.step, first.portfolio_value, self.step_interval
        );
        let client = self.client.clone();
        let store = self.store.clone();
        let every = self.step_interval;
        let handle = PollHandle::spawn(move |cancel| {
            run_step_loop(client, store, every, generation, cancel)
        });
        // Replacing drops (and so cancels) any previous loop.
        *step_loop = Some(handle);
        Ok(first)
    }

    /// Idempotent. After this returns no further step call is issued, and a
    /// response still in flight is discarded.
    pub fn stop(&self) {
        let mut step_loop = self.step_loop();
        if let Some(handle) = step_loop.take() {
            handle.cancel();
        }
        let was_running = self
            .store
            .update(|state| {
                let sim = &mut state.simulation;
                sim.generation += 1;
                let was_running = sim.is_running();
                sim.run_state = RunState::Stopped;
                was_running
            })
            .unwrap_or(false);
        drop(step_loop);
        if was_running {
            info!("Simulation stopped");
        }
    }

    /// Fallback for charting: pulls the server-side history when the local
    /// buffer has nothing yet. Never touches the local buffer.
    pub async fn fetch_server_history(&self) -> Result<usize, ApiError> {
        let history = self.client.get_simulation_history().await?;
        let count = history.len();
        self.store.update(|state| {
            if state.simulation.history.len() <= 1 {
                state.simulation.server_history = history;
            }
        });
        debug!("Fetched {} server history entries", count);
        Ok(count)
    }
}

async fn run_step_loop(
    client: ApiClient,
    store: DashboardStore,
    every: Duration,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let current = store
            .read(|s| s.simulation.generation == generation && s.simulation.is_running());
        if cancel.is_cancelled() || !current {
            debug!("Step loop for a finished run exiting before its next call");
            break;
        }

        let result = client.step_simulation().await;
        if cancel.is_cancelled() {
            debug!("Discarding step response that arrived after stop");
            break;
        }

        let applied = store
            .update(|state| apply_step(&mut state.simulation, generation, result))
            .unwrap_or(StepApplied::Discarded);

        match applied {
            StepApplied::Continue(PushOutcome::OutOfOrder) => {
                debug!("Step snapshot older than history; not charted");
            }
            StepApplied::Continue(_) => {}
            StepApplied::Finished(step) => {
                info!("Simulation finished at step {}", step);
                break;
            }
            StepApplied::Failed(message) => {
                warn!("Step failed, stopping simulation: {}", message);
                break;
            }
            StepApplied::Discarded => {
                debug!("Step loop for a finished run exiting");
                break;
            }
        }
    }
}

fn apply_step(
    sim: &mut SimulationView,
    generation: u64,
    result: Result<SimulationSnapshot, ApiError>,
) -> StepApplied {
    if sim.generation != generation || !sim.is_running() {
        return StepApplied::Discarded;
    }

    match result {
        Ok(snapshot) => {
            let finished = snapshot.reports_stopped();
            let step = snapshot.step;
            let outcome = sim.history.push(snapshot.clone());
            sim.snapshot = Some(snapshot);
            if finished {
                sim.run_state = RunState::Stopped;
                sim.generation += 1;
                StepApplied::Finished(step)
            } else {
                StepApplied::Continue(outcome)
            }
        }
        Err(e) => {
            let message = e.to_string();
            sim.last_error = Some(message.clone());
            sim.run_state = RunState::Stopped;
            sim.generation += 1;
            StepApplied::Failed(message)
        }
    }
}
