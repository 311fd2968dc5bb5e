//! crates/mediqr_core/src/store.rs
//!
//! The record store: whole-collection persistence on top of a `KeyValueStore`.
//!
//! Every read decodes the full collection and every write re-encodes and
//! overwrites it. Bytes that fail to decode are logged and read back as an
//! empty collection, so an empty read means "absent or corrupt".
//!
//! Read-modify-write sequences issued through clones of one `RecordStore` are
//! serialised by `write_lock`. Writers in another process sharing the same
//! medium are not covered: the later overwrite wins.

use crate::ports::{KeyValueStore, PortError, PortResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, warn};

//=========================================================================================
// Keys
//=========================================================================================

/// Multi-record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Users,
    Patients,
}

impl Collection {
    pub fn key(self) -> &'static str {
        match self {
            Collection::Users => "mediqr_users",
            Collection::Patients => "mediqr_patients",
        }
    }
}

/// Single-value slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Session,
    LastScanned,
}

impl Slot {
    pub fn key(self) -> &'static str {
        match self {
            Slot::Session => "mediqr_session",
            Slot::LastScanned => "mediqr_last_scanned_patient",
        }
    }
}

//=========================================================================================
// RecordStore
//=========================================================================================

/// Proof that the caller holds the store's write lock.
pub struct WriteGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[derive(Clone)]
pub struct RecordStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Arc<AsyncMutex<()>>,
}

impl RecordStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Waits for exclusive access to read-modify-write cycles.
    pub async fn write_lock(&self) -> WriteGuard<'_> {
        WriteGuard {
            _guard: self.write_lock.lock().await,
        }
    }

    /// Loads a whole collection. Absent or undecodable bytes yield an empty vector.
    pub async fn load<T: DeserializeOwned>(&self, collection: Collection) -> PortResult<Vec<T>> {
        let Some(raw) = self.kv.get(collection.key()).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(key = collection.key(), error = %e, "Discarding undecodable collection");
                Ok(Vec::new())
            }
        }
    }

    /// Overwrites a whole collection.
    pub async fn save<T: Serialize>(
        &self,
        collection: Collection,
        records: &[T],
    ) -> PortResult<()> {
        let encoded = serde_json::to_vec(records)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        debug!(key = collection.key(), count = records.len(), "Saving collection");
        self.kv.set(collection.key(), Bytes::from(encoded)).await
    }

    pub async fn load_slot<T: DeserializeOwned>(&self, slot: Slot) -> PortResult<Option<T>> {
        let Some(raw) = self.kv.get(slot.key()).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = slot.key(), error = %e, "Discarding undecodable slot");
                Ok(None)
            }
        }
    }

    pub async fn save_slot<T: Serialize>(&self, slot: Slot, value: &T) -> PortResult<()> {
        let encoded = serde_json::to_vec(value)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.kv.set(slot.key(), Bytes::from(encoded)).await
    }

    /// Reads a slot that holds plain text rather than JSON.
    pub async fn load_text_slot(&self, slot: Slot) -> PortResult<Option<String>> {
        let Some(raw) = self.kv.get(slot.key()).await? else {
            return Ok(None);
        };
        match String::from_utf8(raw.to_vec()) {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                warn!(key = slot.key(), error = %e, "Discarding undecodable slot");
                Ok(None)
            }
        }
    }

    pub async fn save_text_slot(&self, slot: Slot, text: &str) -> PortResult<()> {
        let encoded = Bytes::copy_from_slice(text.as_bytes());
        self.kv.set(slot.key(), encoded).await
    }

    pub async fn clear_slot(&self, slot: Slot) -> PortResult<()> {
        self.kv.remove(slot.key()).await
    }
}

//=========================================================================================
// In-Memory Medium
//=========================================================================================

/// A process-local `KeyValueStore`, for tests and for embedding without a database.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> PortResult<std::sync::MutexGuard<'_, HashMap<String, Bytes>>> {
        self.entries
            .lock()
            .map_err(|_| PortError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> PortResult<Option<Bytes>> {
        Ok(self.entries()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> PortResult<()> {
        self.entries()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}
