//! Relay Handler
//!
//! Gate check, then upstream fetch, then body normalization. Quota is counted
//! before the fetch, so a rejected caller never causes outbound traffic and
//! the counter reflects admitted attempts rather than completed fetches.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::error;

use crate::metrics;
use crate::upstream::{FetchError, Fetcher};
use crate::whitelist::{GateDecision, QuotaGate, StoreError};

/// Errors surfaced to relay callers
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("IP address not allowed: {0}")]
    Forbidden(String),

    #[error("Too many requests per ip: {0}")]
    RateLimited(String),

    #[error("Whitelist store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] FetchError),
}

impl RelayError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            RelayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            RelayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Metrics label for this error
    pub fn outcome(&self) -> &'static str {
        match self {
            RelayError::Forbidden(_) => "forbidden",
            RelayError::RateLimited(_) => "rate_limited",
            RelayError::Store(_) => "store_error",
            RelayError::Upstream(_) => "upstream_error",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let detail = match &self {
            RelayError::Forbidden(_) | RelayError::RateLimited(_) => self.to_string(),
            // Internal details stay in the log
            RelayError::Store(_) => "Internal server error".to_string(),
            RelayError::Upstream(_) => "Upstream unavailable".to_string(),
        };
        (self.status_code(), Json(json!({ "detail": detail }))).into_response()
    }
}

/// Gate-then-fetch request handler
#[derive(Clone)]
pub struct RelayHandler {
    gate: QuotaGate,
    fetcher: Arc<dyn Fetcher>,
}

impl RelayHandler {
    /// Create a handler over a gate and an upstream fetcher
    pub fn new(gate: QuotaGate, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { gate, fetcher }
    }

    /// The admission gate
    pub fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    /// Serve one relay request from `client_identifier` (an IP or `host:port`)
    pub async fn handle(&self, client_identifier: &str) -> Result<String, RelayError> {
        let result = self.relay(&normalize_client_id(client_identifier)).await;

        match &result {
            Ok(_) => metrics::record_outcome("accepted"),
            Err(e) => {
                if matches!(e, RelayError::Store(_) | RelayError::Upstream(_)) {
                    error!(client = client_identifier, error = %e, "Relay request failed");
                }
                metrics::record_outcome(e.outcome());
            }
        }

        result
    }

    async fn relay(&self, client_id: &str) -> Result<String, RelayError> {
        match self.gate.check_and_consume(client_id).await? {
            GateDecision::Forbidden => return Err(RelayError::Forbidden(client_id.to_string())),
            GateDecision::RateLimited => {
                return Err(RelayError::RateLimited(client_id.to_string()))
            }
            GateDecision::Proceed { .. } => {}
        }

        let text = self.fetcher.fetch_text().await?;
        Ok(normalize_body(&text))
    }
}

/// Reduce a peer address to the whitelist key: the bare IP.
///
/// IPv4-mapped IPv6 addresses become plain IPv4. Strings that are neither a
/// socket address nor an IP are cut at the first `:`.
pub fn normalize_client_id(raw: &str) -> String {
    let raw = raw.trim();

    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return addr.ip().to_canonical().to_string();
    }
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return ip.to_canonical().to_string();
    }

    raw.split(':').next().unwrap_or(raw).to_string()
}

/// Replace every CRLF pair with a single space
pub fn normalize_body(text: &str) -> String {
    text.replace("\r\n", " ")
}
