//! Capture-side sink that turns exchanges into stored records.
//!
//! `TrafficRecorder` is what an intercepting proxy talks to: it assigns each
//! completed or failed exchange a fresh id from a per-session counter,
//! converts it and persists it through the injected `TrafficStorage`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use droidtap::storage::database_storage::DatabaseStorage;
//! use droidtap::traffic::{CapturedExchange, TrafficRecorder};
//!
//! let storage = Arc::new(DatabaseStorage::new("/tmp/android-proxy-traffic.db", 2000));
//! storage.initialize().unwrap();
//! let recorder = TrafficRecorder::new(storage);
//! let id = recorder.record(&CapturedExchange::default()).unwrap();
//! println!("stored as {}", id);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::TrafficStorage;

use super::converter::{exchange_to_record, CapturedExchange};

pub struct TrafficRecorder {
    storage: Arc<dyn TrafficStorage>,
    next_id: AtomicU64,
}

impl TrafficRecorder {
    pub fn new(storage: Arc<dyn TrafficStorage>) -> Self {
        Self {
            storage,
            next_id: AtomicU64::new(1),
        }
    }

    /// Next id of this capture session; ids are never reused.
    fn allocate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Convert and store one exchange, returning the id it was stored under.
    pub fn record(&self, exchange: &CapturedExchange) -> Result<String, StorageError> {
        let id = self.allocate_id();
        let record = exchange_to_record(exchange, &id);
        debug!(
            "Recording {} {} -> {} as {}",
            record.method, record.url, record.status, id
        );
        self.storage.add(&record).map_err(|e| {
            warn!("Failed to store traffic record {}: {}", id, e);
            e
        })?;
        Ok(id)
    }
}
