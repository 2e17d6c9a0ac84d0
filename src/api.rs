use crate::models::{
    BackendHealth, ChatReply, ChatRequest, MarketQuote, MarketSummary, SimulationSnapshot,
    SymbolSearch,
};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

const HEALTH_PATH: &str = "/api/simulation/health";
const START_PATH: &str = "/api/simulation/start";
const STEP_PATH: &str = "/api/simulation/step";
const STATE_PATH: &str = "/api/simulation/state";
const HISTORY_PATH: &str = "/api/simulation/history";
const MARKET_SUMMARY_PATH: &str = "/api/market/summary";
const QUOTE_PATH: &str = "/api/market/quote";
const QUOTES_PATH: &str = "/api/market/quotes";
const SEARCH_PATH: &str = "/api/market/search";
const CHAT_PATH: &str = "/api/chat/message";

/// Every backend failure collapses into one of these. Transport, HTTP status,
/// and decode failures all land in the operation's variant; callers only ever
/// branch on success vs failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Invalid backend URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Failed to start simulation: {0}")]
    StartFailed(String),

    #[error("Failed to step simulation: {0}")]
    StepFailed(String),

    #[error("Failed to get simulation state: {0}")]
    StateFetchFailed(String),

    #[error("Failed to get simulation history: {0}")]
    HistoryFetchFailed(String),

    #[error("Failed to fetch market summary: {0}")]
    MarketFetchFailed(String),

    #[error("Failed to fetch quote: {0}")]
    QuoteFailed(String),

    #[error("Symbol search failed: {0}")]
    SearchFailed(String),

    #[error("Chat request failed: {0}")]
    ChatFailed(String),
}

impl ApiError {
    /// Human-readable detail without the operation prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidBaseUrl(m)
            | Self::BackendUnreachable(m)
            | Self::StartFailed(m)
            | Self::StepFailed(m)
            | Self::StateFetchFailed(m)
            | Self::HistoryFetchFailed(m)
            | Self::MarketFetchFailed(m)
            | Self::QuoteFailed(m)
            | Self::SearchFailed(m)
            | Self::ChatFailed(m) => m,
        }
    }
}

/// Typed wrapper over the simulation/market/chat backend.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let parsed =
            Url::parse(&base_url).map_err(|e| ApiError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str, fail: fn(String) -> ApiError) -> Result<Url, ApiError> {
        Url::parse(&format!("{}{}", self.base_url, path)).map_err(|e| fail(e.to_string()))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        fail: fn(String) -> ApiError,
    ) -> Result<T, ApiError> {
        let res = req.send().await.map_err(|e| fail(e.to_string()))?;
        let status = res.status();
        debug!("{} -> {}", res.url(), status);
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(fail(error_detail(status, &body)));
        }
        res.json::<T>()
            .await
            .map_err(|e| fail(format!("invalid response body: {e}")))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        fail: fn(String) -> ApiError,
    ) -> Result<T, ApiError> {
        self.send_json(self.client.get(url), fail).await
    }

    pub async fn get_health(&self) -> Result<BackendHealth, ApiError> {
        let url = self.endpoint(HEALTH_PATH, ApiError::BackendUnreachable)?;
        self.get(url, ApiError::BackendUnreachable).await
    }

    /// Resets the backend simulation and returns the first snapshot.
    pub async fn start_simulation(&self) -> Result<SimulationSnapshot, ApiError> {
        let url = self.endpoint(START_PATH, ApiError::StartFailed)?;
        self.send_json(self.client.post(url), ApiError::StartFailed)
            .await
    }

    /// Advances one step. A successful payload may still carry `running: false`.
    pub async fn step_simulation(&self) -> Result<SimulationSnapshot, ApiError> {
        let url = self.endpoint(STEP_PATH, ApiError::StepFailed)?;
        self.send_json(self.client.post(url), ApiError::StepFailed)
            .await
    }

    pub async fn get_simulation_state(&self) -> Result<SimulationSnapshot, ApiError> {
        let url = self.endpoint(STATE_PATH, ApiError::StateFetchFailed)?;
        self.get(url, ApiError::StateFetchFailed).await
    }

    pub async fn get_simulation_history(&self) -> Result<Vec<SimulationSnapshot>, ApiError> {
        let url = self.endpoint(HISTORY_PATH, ApiError::HistoryFetchFailed)?;
        self.get(url, ApiError::HistoryFetchFailed).await
    }

    pub async fn get_market_summary(&self) -> Result<MarketSummary, ApiError> {
        let url = self.endpoint(MARKET_SUMMARY_PATH, ApiError::MarketFetchFailed)?;
        self.get(url, ApiError::MarketFetchFailed).await
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<MarketQuote, ApiError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ApiError::QuoteFailed("Symbol required".to_string()));
        }
        let mut url = self.endpoint(QUOTE_PATH, ApiError::QuoteFailed)?;
        url.path_segments_mut()
            .map_err(|_| ApiError::QuoteFailed(format!("cannot extend {}", self.base_url)))?
            .push(&symbol);
        self.get(url, ApiError::QuoteFailed).await
    }

    /// Batch lookup. An empty (or all-blank) symbol list resolves to an empty
    /// result without touching the network.
    pub async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<MarketQuote>, ApiError> {
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.endpoint(QUOTES_PATH, ApiError::QuoteFailed)?;
        url.query_pairs_mut()
            .append_pair("symbols", &symbols.join(","));
        self.get(url, ApiError::QuoteFailed).await
    }

    pub async fn search_symbols(&self, query: &str) -> Result<Vec<String>, ApiError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.endpoint(SEARCH_PATH, ApiError::SearchFailed)?;
        url.query_pairs_mut().append_pair("q", query);
        let found: SymbolSearch = self.get(url, ApiError::SearchFailed).await?;
        Ok(found.symbols)
    }

    pub async fn send_chat_message(&self, text: &str) -> Result<ChatReply, ApiError> {
        let url = self.endpoint(CHAT_PATH, ApiError::ChatFailed)?;
        let req = self.client.post(url).json(&ChatRequest { message: text });
        self.send_json(req, ApiError::ChatFailed).await
    }
}

/// Prefers FastAPI's `{"detail": ...}`, then the raw body, then the status line.
fn error_detail(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        match map.get("detail") {
            Some(serde_json::Value::String(detail)) if !detail.is_empty() => return detail.clone(),
            Some(other) if !other.is_null() => return other.to_string(),
            _ => {}
        }
    }
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_backend::MockBackend;

    #[test]
    fn error_detail_prefers_fastapi_detail() {
        let body = r#"{"detail":"Quote not found for ZZZZ"}"#;
        assert_eq!(
            error_detail(StatusCode::NOT_FOUND, body),
            "Quote not found for ZZZZ"
        );
        assert_eq!(error_detail(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        assert_eq!(
            error_detail(StatusCode::INTERNAL_SERVER_ERROR, "  "),
            "HTTP 500 Internal Server Error"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            ApiClient::new("not a url"),
            Err(ApiError::InvalidBaseUrl(_))
        ));
        let client = ApiClient::new("http://localhost:8000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[tokio::test]
    async fn empty_quote_list_skips_network() {
        // Nothing listens on port 9; any request would fail.
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.get_quotes(&[]).await.unwrap().is_empty());
        let blanks = vec!["  ".to_string(), String::new()];
        assert!(client.get_quotes(&blanks).await.unwrap().is_empty());
        assert!(client.search_symbols(" ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_backend_maps_to_operation_error() {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(
            client.get_health().await,
            Err(ApiError::BackendUnreachable(_))
        ));
        assert!(matches!(
            client.step_simulation().await,
            Err(ApiError::StepFailed(_))
        ));
    }

    #[tokio::test]
    async fn round_trips_against_mock_backend() {
        let backend = MockBackend::spawn().await;
        let client = ApiClient::new(&backend.base_url).unwrap();

        let health = client.get_health().await.unwrap();
        assert_eq!(health.status, "ok");

        let first = client.start_simulation().await.unwrap();
        assert_eq!(first.step, 0);
        let next = client.step_simulation().await.unwrap();
        assert_eq!(next.step, 1);
        assert_eq!(client.get_simulation_state().await.unwrap().step, 1);
        assert_eq!(client.get_simulation_history().await.unwrap().len(), 1);

        let quotes = client
            .get_quotes(&["aapl".to_string(), " msft ".to_string()])
            .await
            .unwrap();
        let symbols: Vec<&str> = quotes.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);

        let index = client.get_quote("^gspc").await.unwrap();
        assert_eq!(index.symbol, "^GSPC");

        let reply = client.send_chat_message("AAPL price").await.unwrap();
        assert_eq!(reply.reply, "echo: AAPL price");
        assert_eq!(reply.sources, vec!["AAPL".to_string()]);

        assert_eq!(client.search_symbols("eth").await.unwrap(), vec!["ETH-USD".to_string()]);
    }

    #[tokio::test]
    async fn non_success_status_surfaces_server_text() {
        let backend = MockBackend::spawn().await;
        backend.fail_market(true);
        backend.fail_chat(true);
        let client = ApiClient::new(&backend.base_url).unwrap();

        let err = client.get_market_summary().await.unwrap_err();
        assert_eq!(err, ApiError::MarketFetchFailed("yfinance timeout".to_string()));

        let err = client.get_quote("ZZZZ").await.unwrap_err();
        assert_eq!(err.message(), "Quote not found for ZZZZ");

        let err = client.send_chat_message("hello").await.unwrap_err();
        assert!(matches!(err, ApiError::ChatFailed(_)));
    }

    #[tokio::test]
    async fn null_start_payload_is_a_start_failure() {
        let backend = MockBackend::spawn().await;
        backend.start_returns_null(true);
        let client = ApiClient::new(&backend.base_url).unwrap();
        assert!(matches!(
            client.start_simulation().await,
            Err(ApiError::StartFailed(_))
        ));
    }
}
