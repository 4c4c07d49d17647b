//! Debounced, coalescing preference writes
//!
//! Each view owns a single pending-write slot. Scheduling replaces whatever is
//! pending and restarts the window, so only the latest record is written.

use crate::{PreferenceStore, StorageError};
use grid_shared::{PreferenceRecord, ViewId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Lower bound for the debounce window
pub const MIN_DEBOUNCE: Duration = Duration::from_millis(250);

type ErrorCallback = Arc<dyn Fn(&StorageError) + Send + Sync>;

#[derive(Default)]
struct PendingSlot {
    record: Option<PreferenceRecord>,
    /// Bumped on every schedule, flush and cancel; stale timers compare against it
    generation: u64,
}

#[derive(Clone)]
pub struct DebouncedWriter {
    store: Arc<PreferenceStore>,
    view: ViewId,
    delay: Duration,
    slot: Arc<Mutex<PendingSlot>>,
    on_error: Option<ErrorCallback>,
}

impl DebouncedWriter {
    pub fn new(store: Arc<PreferenceStore>, view: ViewId, delay: Duration) -> Self {
        Self {
            store,
            view,
            delay: delay.max(MIN_DEBOUNCE),
            slot: Arc::new(Mutex::new(PendingSlot::default())),
            on_error: None,
        }
    }

    /// Called when a write fails after its retry
    pub fn on_error(mut self, callback: impl Fn(&StorageError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending record and restart the window. Needs a tokio runtime.
    pub fn schedule(&self, record: PreferenceRecord) {
        let generation = {
            let mut slot = self.slot.lock();
            slot.record = Some(record);
            slot.generation += 1;
            slot.generation
        };

        let writer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(writer.delay).await;
            let record = {
                let mut slot = writer.slot.lock();
                if slot.generation != generation {
                    return;
                }
                slot.record.take()
            };
            if let Some(record) = record {
                writer.write(record).await;
            }
        });
    }

    /// Write the pending record now, if any
    pub async fn flush(&self) {
        let record = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.record.take()
        };
        if let Some(record) = record {
            self.write(record).await;
        }
    }

    /// Drop the pending record without writing it
    pub fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        slot.record = None;
    }

    pub fn pending(&self) -> Option<PreferenceRecord> {
        self.slot.lock().record.clone()
    }

    async fn write(&self, record: PreferenceRecord) {
        match self.store.save_with_retry(&self.view, &record).await {
            Ok(()) => log::debug!("Persisted preferences for {}", self.view),
            Err(err) => {
                log::warn!("Giving up on preference write for {}: {err}", self.view);
                if let Some(callback) = &self.on_error {
                    callback(&err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (Arc<MemoryBackend>, Arc<PreferenceStore>, ViewId) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(PreferenceStore::new(backend.clone()));
        (backend, store, ViewId::new("orders").unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_write_wins() {
        let (backend, store, view) = setup();
        let writer = DebouncedWriter::new(store.clone(), view.clone(), MIN_DEBOUNCE);

        writer.schedule(PreferenceRecord::new(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer.schedule(PreferenceRecord::new(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer.schedule(PreferenceRecord::new(50));

        // Nothing is written inside the window
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.write_attempts(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.write_attempts(), 1);
        let stored = store.load(&view).await.unwrap().unwrap();
        assert_eq!(stored.page_size, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_clamped() {
        let (_, store, view) = setup();
        let writer = DebouncedWriter::new(store, view, Duration::from_millis(10));
        assert_eq!(writer.delay(), MIN_DEBOUNCE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately_and_disarms_timer() {
        let (backend, store, view) = setup();
        let writer = DebouncedWriter::new(store.clone(), view.clone(), MIN_DEBOUNCE);

        writer.schedule(PreferenceRecord::new(30));
        writer.flush().await;
        assert_eq!(backend.write_attempts(), 1);
        assert!(writer.pending().is_none());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.write_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_write() {
        let (backend, store, view) = setup();
        let writer = DebouncedWriter::new(store, view, MIN_DEBOUNCE);
        writer.schedule(PreferenceRecord::new(30));
        writer.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.write_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_callback_after_retry() {
        let (backend, store, view) = setup();
        backend.set_fail_writes(true);
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let writer = DebouncedWriter::new(store, view, MIN_DEBOUNCE).on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        writer.schedule(PreferenceRecord::new(30));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.write_attempts(), 2);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }
}
