//! Quota Gate
//!
//! Admission check in front of the relay. Holds no state of its own; every
//! decision is made by the store under its lock.

use std::sync::Arc;
use tracing::{debug, info};

use super::error::StoreError;
use super::store::{ConsumeOutcome, WhitelistStore};

/// Caller-facing result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Request admitted and counted
    Proceed { remaining: u64 },

    /// Client is not whitelisted
    Forbidden,

    /// Client is whitelisted but its quota is used up
    RateLimited,
}

impl From<ConsumeOutcome> for GateDecision {
    fn from(outcome: ConsumeOutcome) -> Self {
        match outcome {
            ConsumeOutcome::Accepted {
                used_requests,
                max_requests,
            } => GateDecision::Proceed {
                remaining: max_requests - used_requests,
            },
            ConsumeOutcome::QuotaExceeded { .. } => GateDecision::RateLimited,
            ConsumeOutcome::NotWhitelisted => GateDecision::Forbidden,
        }
    }
}

/// Whitelist-and-quota admission gate
#[derive(Debug, Clone)]
pub struct QuotaGate {
    store: Arc<WhitelistStore>,
}

impl QuotaGate {
    /// Create a gate over a shared store
    pub fn new(store: Arc<WhitelistStore>) -> Self {
        Self { store }
    }

    /// The store this gate consults
    pub fn store(&self) -> &Arc<WhitelistStore> {
        &self.store
    }

    /// Check `client_id` against the whitelist and count the request if admitted
    pub async fn check_and_consume(&self, client_id: &str) -> Result<GateDecision, StoreError> {
        let decision = GateDecision::from(self.store.try_consume(client_id).await?);

        match decision {
            GateDecision::Proceed { remaining } => {
                debug!(client_id, remaining, "Request admitted");
            }
            GateDecision::Forbidden => info!(client_id, "Rejected client not on whitelist"),
            GateDecision::RateLimited => info!(client_id, "Rejected client over quota"),
        }

        Ok(decision)
    }
}
