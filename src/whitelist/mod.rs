//! Whitelist and Quota Module
//!
//! Per-client request quotas for the relay, persisted in a single JSON file.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────┐
//! │  Relay handlers  │        │  Admin console   │
//! └────────┬─────────┘        └────────┬─────────┘
//!          │ check_and_consume         │ add / remove
//!   ┌──────▼───────┐                   │
//!   │  Quota Gate  │                   │
//!   └──────┬───────┘                   │
//!          │ try_consume               │
//! ┌────────▼───────────────────────────▼─────────┐
//! │  Whitelist Store (one lock, whole document)  │
//! └──────────────────────┬───────────────────────┘
//!                        │ load / save (temp file + rename)
//!                 data/whitelist.json
//! ```

pub mod entry;
pub mod error;
pub mod gate;
pub mod store;

#[cfg(test)]
mod proptests;

pub use entry::{Whitelist, WhitelistEntry};
pub use error::StoreError;
pub use gate::{GateDecision, QuotaGate};
pub use store::{ConsumeOutcome, WhitelistStore};
