//! Durable per-view preference storage
//!
//! A [`PreferenceStore`] namespaces view ids into backend keys, migrates
//! records written by older schema versions and serialises writes to the same
//! key. Backends only deal in strings; the browser `localStorage` backend and
//! an in-memory backend ship with the crate, and hosts can plug in a remote
//! settings service by implementing [`PreferenceBackend`].

pub mod debounce;
pub mod memory;
pub mod migration;
#[cfg(target_arch = "wasm32")]
pub mod simple;

use async_trait::async_trait;
use dashmap::DashMap;
use grid_shared::{GridError, PreferenceRecord, ViewId, CURRENT_SCHEMA_VERSION};
use std::sync::Arc;
use thiserror::Error;

pub use debounce::{DebouncedWriter, MIN_DEBOUNCE};
pub use memory::MemoryBackend;
pub use migration::Migrator;

/// Namespace used when the host does not pick one
pub const DEFAULT_NAMESPACE: &str = "grid-prefs";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl From<StorageError> for GridError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(message) => GridError::StorageUnavailable { message },
            StorageError::QuotaExceeded(message) => GridError::StorageQuotaExceeded { message },
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// String key-value backend. Implementations may be local or remote.
#[async_trait]
pub trait PreferenceBackend: Send + Sync {
    /// `Ok(None)` means no value has been stored yet
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Must replace the value atomically; a failed write leaves the old value
    async fn write(&self, key: &str, value: String) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Process-wide preference store shared by all grids
pub struct PreferenceStore {
    backend: Arc<dyn PreferenceBackend>,
    namespace: String,
    migrator: Migrator,
    /// One async lock per backend key so same-key writes never interleave
    write_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl PreferenceStore {
    pub fn new(backend: Arc<dyn PreferenceBackend>) -> Self {
        Self::with_namespace(backend, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(backend: Arc<dyn PreferenceBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
            migrator: Migrator::default(),
            write_locks: DashMap::new(),
        }
    }

    /// In-memory store, mostly useful for tests and server-side rendering
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn with_migrator(mut self, migrator: Migrator) -> Self {
        self.migrator = migrator;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Backend key for a view
    pub fn key_for(&self, view: &ViewId) -> String {
        format!("{}:{}", self.namespace, view.as_str())
    }

    /// Load and migrate the record of a view
    pub async fn load(&self, view: &ViewId) -> Result<Option<PreferenceRecord>> {
        let key = self.key_for(view);
        let raw = match self.backend.read(&key).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| StorageError::Unavailable(format!("corrupt record for {key}: {e}")))?;
        let mut map = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(StorageError::Unavailable(format!(
                    "record for {key} is not an object: {other}"
                )))
            }
        };

        let from = self.migrator.migrate(&mut map);
        if from < CURRENT_SCHEMA_VERSION {
            log::info!("Migrated preferences for {key} from v{from} to v{CURRENT_SCHEMA_VERSION}");
        }

        serde_json::from_value(serde_json::Value::Object(map))
            .map(Some)
            .map_err(|e| StorageError::Unavailable(format!("invalid record for {key}: {e}")))
    }

    /// Persist a record in a single backend write
    pub async fn save(&self, view: &ViewId, record: &PreferenceRecord) -> Result<()> {
        let key = self.key_for(view);
        let json = serde_json::to_string(record)
            .map_err(|e| StorageError::Unavailable(format!("failed to encode record: {e}")))?;

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        self.backend.write(&key, json).await
    }

    /// Save, retrying once before giving up
    pub async fn save_with_retry(&self, view: &ViewId, record: &PreferenceRecord) -> Result<()> {
        match self.save(view, record).await {
            Ok(()) => Ok(()),
            Err(first) => {
                log::warn!("Preference save for {view} failed, retrying: {first}");
                self.save(view, record).await
            }
        }
    }

    pub async fn clear(&self, view: &ViewId) -> Result<()> {
        let key = self.key_for(view);
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        self.backend.remove(&key).await
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
