use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::capabilities::kv::{KeyNamespace, KvBackend, KvError, KvKey};
use crate::error::ErrorCategory;
use crate::outbox::{QueuedRequest, MAX_QUEUED_REQUESTS};

pub const DEFAULT_STORAGE_KEY: &str = "bombus-request-queue";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Kv(#[from] KvError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("too many persisted entries: {count}, max {max}")]
    TooManyEntries { count: usize, max: usize },
}

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Persistence
    }
}

/// Durable slot holding the pending-request list as one JSON array.
///
/// Every save rewrites the whole array. Reads never fail: a missing,
/// unreadable or corrupt value degrades to an empty queue.
#[derive(Clone)]
pub struct QueueStore {
    backend: Arc<dyn KvBackend>,
    key: KvKey,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("key", &self.key.raw())
            .finish_non_exhaustive()
    }
}

impl QueueStore {
    pub fn new(backend: Arc<dyn KvBackend>, storage_key: &str) -> Result<Self, StoreError> {
        let key = KvKey::new(KeyNamespace::Outbox, storage_key)?;
        Ok(Self { backend, key })
    }

    pub fn key(&self) -> &KvKey {
        &self.key
    }

    #[instrument(skip(self), fields(key = %self.key.raw()))]
    pub fn load(&self) -> Vec<QueuedRequest> {
        match self.try_load() {
            Ok(entries) => {
                debug!(count = entries.len(), "loaded persisted queue");
                entries
            }
            Err(e) => {
                warn!(
                    category = e.category().code(),
                    error = %e,
                    "persisted queue unreadable, starting empty"
                );
                Vec::new()
            }
        }
    }

    pub fn try_load(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        let Some(raw) = self.backend.get(&self.key)? else {
            return Ok(Vec::new());
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<QueuedRequest> = serde_json::from_str(&raw)?;
        check_len(entries.len())?;
        Ok(entries)
    }

    /// Overwrites the persisted queue. Failures are logged and swallowed;
    /// the return value only reports whether the write landed.
    #[instrument(skip(self, entries), fields(key = %self.key.raw(), count = entries.len()))]
    pub fn save(&self, entries: &[QueuedRequest]) -> bool {
        match self.try_save(entries) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    category = e.category().code(),
                    error = %e,
                    "failed to persist queue, keeping in-memory copy"
                );
                false
            }
        }
    }

    /// Refuses to write more entries than a later load would accept.
    pub fn try_save(&self, entries: &[QueuedRequest]) -> Result<(), StoreError> {
        check_len(entries.len())?;
        let json = serde_json::to_string(entries)?;
        self.backend.set(&self.key, &json)?;
        Ok(())
    }
}

fn check_len(count: usize) -> Result<(), StoreError> {
    if count > MAX_QUEUED_REQUESTS {
        return Err(StoreError::TooManyEntries {
            count,
            max: MAX_QUEUED_REQUESTS,
        });
    }
    Ok(())
}
