//! Whitelist Store
//!
//! File-backed storage for whitelist entries and their request counters.
//!
//! The state file is a single JSON document, so every mutation is a
//! whole-document load-modify-save. One async mutex covers that sequence for
//! every operation (and for the public `load`/`save`), which serializes all
//! writers in the process: relay handlers and the admin console alike.
//! Nothing is cached between operations; each one re-reads the file.
//!
//! Saves are staged in a `<stem>.<uuid>.tmp` sibling, synced, renamed over
//! the state file, and the directory is synced after the rename.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::entry::{Whitelist, WhitelistEntry};
use super::error::StoreError;

/// Outcome of a quota-consuming request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Request admitted; the new counter has been persisted
    Accepted { used_requests: u64, max_requests: u64 },

    /// Client is whitelisted but has no requests left (nothing persisted)
    QuotaExceeded { used_requests: u64, max_requests: u64 },

    /// Client has no whitelist entry (nothing persisted)
    NotWhitelisted,
}

/// Durable whitelist store backed by a JSON file
#[derive(Debug)]
pub struct WhitelistStore {
    /// Backing file
    path: PathBuf,

    /// Directory that receives staged writes before they are renamed into place
    staging_dir: PathBuf,

    /// Guards every load-modify-save on the backing file
    lock: Mutex<()>,
}

impl WhitelistStore {
    /// Open the store at `path`, creating the file with an empty whitelist if
    /// it does not exist yet. Existing content is left untouched; staged
    /// writes left over from an interrupted save are removed.
    pub async fn initialize(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let staging_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let store = Self {
            path,
            staging_dir,
            lock: Mutex::new(()),
        };

        tokio::fs::create_dir_all(&store.staging_dir)
            .await
            .map_err(|e| StoreError::io(&store.staging_dir, e))?;

        store.remove_stale_temp_files().await?;

        let exists = tokio::fs::try_exists(&store.path)
            .await
            .map_err(|e| StoreError::io(&store.path, e))?;

        if !exists {
            info!(path = %store.path.display(), "Initializing empty whitelist store");
            store.write_state(&Whitelist::new()).await?;
        }

        Ok(store)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole persisted whitelist
    pub async fn load(&self) -> Result<Whitelist, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_state().await
    }

    /// Replace the whole persisted whitelist.
    ///
    /// A whitelist holding the same client twice is refused with
    /// [`StoreError::Invalid`] and the file is left as it was.
    pub async fn save(&self, state: &Whitelist) -> Result<(), StoreError> {
        if let Some(duplicate) = state.find_duplicate() {
            return Err(StoreError::invalid(format!(
                "duplicate entry for client {duplicate}"
            )));
        }

        let _guard = self.lock.lock().await;
        self.write_state(state).await
    }

    /// Whitelist `client_id` with a quota of `max_requests`.
    ///
    /// Returns `false` if the client was already present; its quota and
    /// counter are left as they were.
    pub async fn add(&self, client_id: &str, max_requests: u64) -> Result<bool, StoreError> {
        let inserted = self
            .mutate(|state| {
                let inserted = state.insert(WhitelistEntry::new(client_id, max_requests));
                (inserted, inserted)
            })
            .await?;

        if inserted {
            info!(client_id, max_requests, "Client added to whitelist");
        } else {
            debug!(client_id, "Client already whitelisted, quota unchanged");
        }
        Ok(inserted)
    }

    /// Remove `client_id` from the whitelist. Returns whether it was present.
    pub async fn remove(&self, client_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .mutate(|state| {
                let removed = state.remove(client_id);
                (removed, removed)
            })
            .await?;

        if removed {
            info!(client_id, "Client removed from whitelist");
        }
        Ok(removed)
    }

    /// Count one request against `client_id`'s quota.
    ///
    /// Only an accepted request is written back; rejections never touch the
    /// file.
    pub async fn try_consume(&self, client_id: &str) -> Result<ConsumeOutcome, StoreError> {
        self.mutate(|state| {
            let Some(entry) = state.get_mut(client_id) else {
                return (ConsumeOutcome::NotWhitelisted, false);
            };

            match entry.used_requests.checked_add(1) {
                Some(candidate) if candidate <= entry.max_requests => {
                    entry.used_requests = candidate;
                    let outcome = ConsumeOutcome::Accepted {
                        used_requests: candidate,
                        max_requests: entry.max_requests,
                    };
                    (outcome, true)
                }
                _ => {
                    let outcome = ConsumeOutcome::QuotaExceeded {
                        used_requests: entry.used_requests,
                        max_requests: entry.max_requests,
                    };
                    (outcome, false)
                }
            }
        })
        .await
    }

    /// Run `operation` on a freshly loaded whitelist under the store lock,
    /// saving the result if the operation reports a change.
    ///
    /// If the save fails the modified copy is dropped and the error returned;
    /// the file still holds the last successful save.
    async fn mutate<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Whitelist) -> (T, bool),
    {
        let _guard = self.lock.lock().await;

        let mut state = self.read_state().await?;
        let (result, changed) = operation(&mut state);

        if changed {
            self.write_state(&state).await?;
        }

        Ok(result)
    }

    async fn read_state(&self) -> Result<Whitelist, StoreError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to read whitelist store");
            StoreError::io(&self.path, e)
        })?;

        decode(&self.path, &raw)
    }

    async fn write_state(&self, state: &Whitelist) -> Result<(), StoreError> {
        let payload = encode(state)?;
        let mut staged = StagedFile::new(self.staging_dir.join(format!(
            "{}.{}.tmp",
            self.file_stem(),
            Uuid::new_v4().simple()
        )));

        if let Err(e) = write_synced(&staged.path, &payload).await {
            error!(path = %staged.path.display(), error = %e, "Failed to write whitelist store");
            return Err(StoreError::io(&staged.path, e));
        }

        if let Err(e) = tokio::fs::rename(&staged.path, &self.path).await {
            error!(path = %self.path.display(), error = %e, "Failed to replace whitelist store");
            return Err(StoreError::io(&self.path, e));
        }
        staged.committed = true;

        // The rename itself is only durable once the directory entry is synced
        if let Err(e) = sync_dir(self.path.parent()).await {
            warn!(path = %self.path.display(), error = %e, "Failed to sync whitelist store directory");
        }

        Ok(())
    }

    fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| "whitelist".to_string(), |s| s.to_string_lossy().into_owned())
    }

    async fn remove_stale_temp_files(&self) -> Result<(), StoreError> {
        let prefix = format!("{}.", self.file_stem());
        let mut entries = tokio::fs::read_dir(&self.staging_dir)
            .await
            .map_err(|e| StoreError::io(&self.staging_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.staging_dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            if is_file && name.starts_with(&prefix) && name.ends_with(".tmp") {
                warn!(path = %entry.path().display(), "Removing stale staged whitelist write");
                tokio::fs::remove_file(entry.path())
                    .await
                    .map_err(|e| StoreError::io(entry.path(), e))?;
            }
        }

        Ok(())
    }
}

/// A staged write that is deleted on drop unless it was renamed into place.
///
/// Covers both error returns and a save future dropped mid-write.
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

async fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(payload).await?;
    file.sync_all().await
}

#[cfg(unix)]
async fn sync_dir(dir: Option<&Path>) -> std::io::Result<()> {
    let dir = dir
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::File::open(dir).await?.sync_all().await
}

// No directory handle to sync on this platform
#[cfg(not(unix))]
async fn sync_dir(_dir: Option<&Path>) -> std::io::Result<()> {
    Ok(())
}

/// Serialize with 4-space indentation, the layout the state file has always had
pub(crate) fn encode(state: &Whitelist) -> Result<Vec<u8>, StoreError> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    state.serialize(&mut serializer)?;
    Ok(buffer)
}

pub(crate) fn decode(path: &Path, raw: &[u8]) -> Result<Whitelist, StoreError> {
    let state: Whitelist =
        serde_json::from_slice(raw).map_err(|e| StoreError::corrupt(path, e.to_string()))?;

    if let Some(duplicate) = state.find_duplicate() {
        return Err(StoreError::corrupt(
            path,
            format!("duplicate entry for client {duplicate}"),
        ));
    }

    Ok(state)
}
