//! Proxylist Relay Library
//!
//! An access-gated relay: whitelisted client addresses, each with a request
//! quota, may fetch the upstream proxy list through a single endpoint. The
//! whitelist lives in a crash-safe JSON file shared by the request handlers
//! and the operator's admin console.

pub mod admin;
pub mod config;
pub mod metrics;
pub mod relay;
pub mod relay_server;
pub mod upstream;
pub mod whitelist;

pub use admin::{AdminCommand, AdminConsole};
pub use config::Config;
pub use relay::{RelayError, RelayHandler};
pub use upstream::{FetchError, Fetcher, HttpFetcher};
pub use whitelist::{ConsumeOutcome, GateDecision, QuotaGate, StoreError, WhitelistStore};
