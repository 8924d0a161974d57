//! Whitelist Entries
//!
//! The persisted aggregate. Field names on the wire are fixed by the state
//! file format (`whitelisted_ips`, `ip`, `max_response_count`,
//! `response_count`) and must not change.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Quota state for one whitelisted client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    /// Normalized client identifier (source IP address)
    #[serde(rename = "ip")]
    pub client_id: String,

    /// Quota ceiling, set when the entry is added
    #[serde(rename = "max_response_count")]
    pub max_requests: u64,

    /// Accepted requests so far
    #[serde(rename = "response_count")]
    pub used_requests: u64,
}

impl WhitelistEntry {
    /// Create a fresh entry with no requests used
    pub fn new(client_id: impl Into<String>, max_requests: u64) -> Self {
        Self {
            client_id: client_id.into(),
            max_requests,
            used_requests: 0,
        }
    }

    /// Requests still available under the quota
    pub fn remaining(&self) -> u64 {
        self.max_requests.saturating_sub(self.used_requests)
    }
}

/// Whole-document whitelist state, as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Whitelist {
    #[serde(rename = "whitelisted_ips")]
    pub entries: Vec<WhitelistEntry>,
}

impl Whitelist {
    /// Create an empty whitelist
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry by client identifier
    pub fn get(&self, client_id: &str) -> Option<&WhitelistEntry> {
        self.entries.iter().find(|e| e.client_id == client_id)
    }

    /// Mutable lookup by client identifier
    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut WhitelistEntry> {
        self.entries.iter_mut().find(|e| e.client_id == client_id)
    }

    /// Whether a client identifier is present
    pub fn contains(&self, client_id: &str) -> bool {
        self.get(client_id).is_some()
    }

    /// Append an entry unless the client identifier is already present.
    ///
    /// Returns `false` and leaves the existing quota untouched on a duplicate.
    pub fn insert(&mut self, entry: WhitelistEntry) -> bool {
        if self.contains(&entry.client_id) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Drop the entry for a client identifier. Returns whether one was removed.
    pub fn remove(&mut self, client_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.client_id != client_id);
        self.entries.len() != before
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the whitelist has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First client identifier that appears more than once, if any
    pub fn find_duplicate(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|e| e.client_id.as_str())
            .find(|id| !seen.insert(*id))
    }
}
