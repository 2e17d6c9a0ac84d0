//! In-process stand-in for the simulation/market/chat backend, used by tests.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

#[derive(Default)]
struct MockState {
    step: AtomicU64,
    running: AtomicBool,
    start_calls: AtomicUsize,
    step_calls: AtomicUsize,
    state_calls: AtomicUsize,
    market_calls: AtomicUsize,
    quotes_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    stop_at_step: Mutex<Option<u64>>,
    fail_step_at: Mutex<Option<u64>>,
    step_delay: Mutex<Duration>,
    fail_market: AtomicBool,
    fail_chat: AtomicBool,
    start_null: AtomicBool,
    zero_based_steps: AtomicBool,
    history: Mutex<Vec<Value>>,
}

pub struct MockBackend {
    pub base_url: String,
    state: Arc<MockState>,
    server: JoinHandle<()>,
}

impl MockBackend {
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/api/simulation/health", get(health))
            .route("/api/simulation/start", post(start))
            .route("/api/simulation/step", post(step))
            .route("/api/simulation/state", get(current_state))
            .route("/api/simulation/history", get(history))
            .route("/api/market/summary", get(market_summary))
            .route("/api/market/quote/:symbol", get(quote))
            .route("/api/market/quotes", get(quotes))
            .route("/api/market/search", get(search))
            .route("/api/chat/message", post(chat))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            server,
        }
    }

    pub fn stop_at_step(&self, step: u64) {
        *self.state.stop_at_step.lock().unwrap() = Some(step);
    }

    pub fn fail_step_at(&self, step: u64) {
        *self.state.fail_step_at.lock().unwrap() = Some(step);
    }

    pub fn set_step_delay(&self, delay: Duration) {
        *self.state.step_delay.lock().unwrap() = delay;
    }

    pub fn set_current_step(&self, step: u64) {
        self.state.step.store(step, Ordering::SeqCst);
    }

    pub fn fail_market(&self, fail: bool) {
        self.state.fail_market.store(fail, Ordering::SeqCst);
    }

    pub fn fail_chat(&self, fail: bool) {
        self.state.fail_chat.store(fail, Ordering::SeqCst);
    }

    pub fn start_returns_null(&self, null: bool) {
        self.state.start_null.store(null, Ordering::SeqCst);
    }

    /// Report each step with the count of steps taken before it, so the first
    /// step after a reset shares the reset's `step: 0`.
    pub fn number_steps_from_zero(&self, on: bool) {
        self.state.zero_based_steps.store(on, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> usize {
        self.state.start_calls.load(Ordering::SeqCst)
    }

    pub fn step_calls(&self) -> usize {
        self.state.step_calls.load(Ordering::SeqCst)
    }

    pub fn state_calls(&self) -> usize {
        self.state.state_calls.load(Ordering::SeqCst)
    }

    pub fn market_calls(&self) -> usize {
        self.state.market_calls.load(Ordering::SeqCst)
    }

    pub fn quotes_calls(&self) -> usize {
        self.state.quotes_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.state.chat_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn snapshot(step: u64, running: bool) -> Value {
    json!({
        "step": step,
        "portfolio_value": 1_000_000.0 + 2_000.0 * step as f64,
        "drawdown": 0.01 * step as f64,
        "volatility": 0.15,
        "turnover": 0.02,
        "weights": [0.4, 0.3, 0.2],
        "running": running,
    })
}

fn quote_json(symbol: &str) -> Value {
    json!({
        "symbol": symbol,
        "name": format!("{} Corp", symbol),
        "price": 100.0,
        "change": 1.5,
        "changePercent": 1.52,
        "volume": 1_000_000,
        "high": 101.0,
        "low": 98.5,
    })
}

fn detail(status: StatusCode, text: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "detail": text })))
}

async fn health(State(state): State<Arc<MockState>>) -> Reply {
    Ok(Json(json!({
        "status": "ok",
        "model_loaded": true,
        "running": state.running.load(Ordering::SeqCst),
    })))
}

async fn start(State(state): State<Arc<MockState>>) -> Reply {
    state.start_calls.fetch_add(1, Ordering::SeqCst);
    if state.start_null.load(Ordering::SeqCst) {
        return Ok(Json(Value::Null));
    }
    state.step.store(0, Ordering::SeqCst);
    state.running.store(true, Ordering::SeqCst);
    state.history.lock().unwrap().clear();
    Ok(Json(snapshot(0, true)))
}

async fn step(State(state): State<Arc<MockState>>) -> Reply {
    state.step_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *state.step_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if !state.running.load(Ordering::SeqCst) {
        return Ok(Json(snapshot(state.step.load(Ordering::SeqCst), false)));
    }

    let next = state.step.load(Ordering::SeqCst) + 1;
    if *state.fail_step_at.lock().unwrap() == Some(next) {
        state.running.store(false, Ordering::SeqCst);
        return Err(detail(StatusCode::INTERNAL_SERVER_ERROR, "environment crashed"));
    }

    state.step.store(next, Ordering::SeqCst);
    let still_running = *state.stop_at_step.lock().unwrap() != Some(next);
    state.running.store(still_running, Ordering::SeqCst);
    let mut snap = snapshot(next, still_running);
    if state.zero_based_steps.load(Ordering::SeqCst) {
        snap["step"] = json!(next - 1);
    }
    state.history.lock().unwrap().push(snap.clone());
    Ok(Json(snap))
}

async fn current_state(State(state): State<Arc<MockState>>) -> Reply {
    state.state_calls.fetch_add(1, Ordering::SeqCst);
    Ok(Json(snapshot(
        state.step.load(Ordering::SeqCst),
        state.running.load(Ordering::SeqCst),
    )))
}

async fn history(State(state): State<Arc<MockState>>) -> Reply {
    Ok(Json(Value::Array(state.history.lock().unwrap().clone())))
}

async fn market_summary(State(state): State<Arc<MockState>>) -> Reply {
    let call = state.market_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if state.fail_market.load(Ordering::SeqCst) {
        return Err(detail(StatusCode::BAD_GATEWAY, "yfinance timeout"));
    }
    Ok(Json(json!({
        "indices": [quote_json("^GSPC"), quote_json("^IXIC")],
        "watchlist": [quote_json("AAPL"), quote_json("MSFT")],
        "gainers": [quote_json("NVDA")],
        "losers": [quote_json("TSLA")],
        "sp500": quote_json("^GSPC"),
        "timestamp": format!("2024-05-01T14:{:02}:00Z", call % 60),
    })))
}

async fn quote(Path(symbol): Path<String>) -> Reply {
    if symbol == "ZZZZ" {
        return Err(detail(
            StatusCode::NOT_FOUND,
            &format!("Quote not found for {}", symbol),
        ));
    }
    Ok(Json(quote_json(&symbol)))
}

async fn quotes(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    state.quotes_calls.fetch_add(1, Ordering::SeqCst);
    let symbols = params.get("symbols").cloned().unwrap_or_default();
    let list: Vec<Value> = symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(quote_json)
        .collect();
    if list.is_empty() {
        return Err(detail(StatusCode::BAD_REQUEST, "At least one symbol required"));
    }
    Ok(Json(Value::Array(list)))
}

async fn search(Query(params): Query<HashMap<String, String>>) -> Reply {
    let q = params.get("q").cloned().unwrap_or_default().to_uppercase();
    let known = ["^GSPC", "AAPL", "MSFT", "BTC-USD", "ETH-USD"];
    let symbols: Vec<&str> = known.iter().copied().filter(|s| s.contains(&q)).collect();
    Ok(Json(json!({ "symbols": symbols })))
}

async fn chat(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    state.chat_calls.fetch_add(1, Ordering::SeqCst);
    if state.fail_chat.load(Ordering::SeqCst) {
        return Err(detail(StatusCode::INTERNAL_SERVER_ERROR, "assistant offline"));
    }
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let sources: Vec<&str> = message
        .split_whitespace()
        .filter(|w| {
            (2..=5).contains(&w.len()) && w.chars().all(|c| c.is_ascii_uppercase())
        })
        .collect();
    Ok(Json(json!({
        "reply": format!("echo: {}", message),
        "sources": sources,
    })))
}
