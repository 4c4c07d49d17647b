//! In-memory preference backend with an optional byte quota

use crate::{PreferenceBackend, Result, StorageError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MemoryBackend {
    values: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_attempts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes once the sum of keys and values would exceed `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Make subsequent reads fail with `Unavailable`
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent writes and removals fail with `Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::Relaxed)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn used_bytes_without(values: &HashMap<String, String>, key: &str) -> usize {
        values
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

#[async_trait]
impl PreferenceBackend for MemoryBackend {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("memory backend read disabled".into()));
        }
        Ok(self.values.read().get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("memory backend write disabled".into()));
        }

        let mut values = self.values.write();
        if let Some(quota) = self.quota_bytes {
            let needed = Self::used_bytes_without(&values, key) + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded(format!(
                    "{needed} bytes needed, quota is {quota}"
                )));
            }
        }
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("memory backend write disabled".into()));
        }
        self.values.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_counts_replaced_value_once() {
        let backend = MemoryBackend::with_quota(10);
        backend.write("k", "12345".into()).await.unwrap();
        // Replacing the same key only needs the new value's room
        backend.write("k", "123456789".into()).await.unwrap();
        assert!(backend.write("j", "x".into()).await.is_err());
        assert_eq!(backend.raw("k").as_deref(), Some("123456789"));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let backend = MemoryBackend::new();
        backend.set_fail_reads(true);
        assert!(backend.read("k").await.is_err());
        backend.set_fail_reads(false);
        assert_eq!(backend.read("k").await.unwrap(), None);
    }
}
