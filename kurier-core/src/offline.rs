//! Offline persistence store
//!
//! Bounded FIFO holding records whose delivery retries were exhausted (or
//! that were captured while the device was known offline). The in-memory
//! list is authoritative; every mutation re-snapshots it to the storage
//! backend so a restart can pick up where the last session left off.
//! Storage failures degrade the affected operation to memory-only and are
//! never surfaced past this module.

use crate::storage::StorageBackend;
use crate::types::TelemetryRecord;

/// Backend key the record snapshot lives under.
pub const OFFLINE_KEY: &str = "offline_records";

/// Bounded durable FIFO of undeliverable records.
pub struct OfflineStore {
    backend: Box<dyn StorageBackend>,
    records: Vec<TelemetryRecord>,
    max_records: usize,
}

impl OfflineStore {
    pub fn new(backend: Box<dyn StorageBackend>, max_records: usize) -> Self {
        Self {
            backend,
            records: Vec::new(),
            max_records,
        }
    }

    /// Load whatever the previous session left behind and clear the store.
    ///
    /// Call once at startup, before the sender starts admitting. The
    /// returned records belong to the caller (they are re-injected into
    /// the batch queue). A corrupt snapshot clears the store instead of
    /// retrying the decode; an unreadable backend starts the session
    /// empty.
    pub fn restore_on_startup(&mut self) -> Vec<TelemetryRecord> {
        let bytes = match self.backend.read(OFFLINE_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Offline store read failed, starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_slice::<Vec<TelemetryRecord>>(&bytes) {
            Ok(records) => {
                self.clear_durable();
                tracing::info!(count = records.len(), "Restored offline records");
                records
            }
            Err(e) => {
                tracing::warn!(error = %e, "Corrupt offline snapshot, clearing store");
                self.clear_durable();
                Vec::new()
            }
        }
    }

    /// Append records, evicting the oldest beyond the cap.
    ///
    /// Returns how many records were evicted. Never errors: a failed
    /// persist keeps the records drainable in memory.
    pub fn push(&mut self, records: Vec<TelemetryRecord>) -> usize {
        self.records.extend(records);

        let evicted = self.records.len().saturating_sub(self.max_records);
        if evicted > 0 {
            self.records.drain(..evicted);
            tracing::warn!(
                evicted,
                cap = self.max_records,
                "Offline store over capacity, dropped oldest records"
            );
        }

        self.persist();
        evicted
    }

    /// Remove and return everything, clearing durable storage.
    pub fn take_all(&mut self) -> Vec<TelemetryRecord> {
        let records = std::mem::take(&mut self.records);
        self.clear_durable();
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&mut self) {
        let bytes = match serde_json::to_vec(&self.records) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode offline snapshot");
                return;
            }
        };
        if let Err(e) = self.backend.write(OFFLINE_KEY, &bytes) {
            tracing::warn!(
                error = %e,
                "Offline store write failed, keeping records in memory only"
            );
        }
    }

    fn clear_durable(&mut self) {
        if let Err(e) = self.backend.remove(OFFLINE_KEY) {
            tracing::warn!(error = %e, "Failed to clear offline storage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStore;

    /// Backend whose writes and removes always fail.
    struct BrokenBackend;

    impl StorageBackend for BrokenBackend {
        fn read(&self, _key: &str) -> crate::error::Result<Option<Vec<u8>>> {
            Err(Error::Storage("read unavailable".to_string()))
        }

        fn write(&mut self, _key: &str, _bytes: &[u8]) -> crate::error::Result<()> {
            Err(Error::Storage("quota exceeded".to_string()))
        }

        fn remove(&mut self, _key: &str) -> crate::error::Result<()> {
            Err(Error::Storage("remove unavailable".to_string()))
        }
    }

    fn record(n: u32) -> TelemetryRecord {
        TelemetryRecord::event("test", serde_json::json!({ "n": n }))
    }

    fn numbers(records: &[TelemetryRecord]) -> Vec<u64> {
        records
            .iter()
            .map(|r| r.payload["n"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn test_push_then_take_all_round_trip() {
        let mut store = OfflineStore::new(Box::new(MemoryStore::new()), 10);
        store.push(vec![record(1), record(2)]);
        store.push(vec![record(3)]);
        assert_eq!(store.len(), 3);

        let drained = store.take_all();
        assert_eq!(numbers(&drained), vec![1, 2, 3]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_seven_pushes_into_cap_five_keep_newest() {
        let mut store = OfflineStore::new(Box::new(MemoryStore::new()), 5);
        for n in 1..=7 {
            store.push(vec![record(n)]);
        }
        assert_eq!(store.len(), 5);
        assert_eq!(numbers(&store.take_all()), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_oversized_single_push_keeps_newest() {
        let mut store = OfflineStore::new(Box::new(MemoryStore::new()), 3);
        let evicted = store.push((1..=8).map(record).collect());
        assert_eq!(evicted, 5);
        assert_eq!(numbers(&store.take_all()), vec![6, 7, 8]);
    }

    #[test]
    fn test_restore_reads_previous_snapshot_and_clears() {
        let mut backend = MemoryStore::new();
        let snapshot = serde_json::to_vec(&vec![record(7), record(8)]).unwrap();
        backend.write(OFFLINE_KEY, &snapshot).unwrap();

        let mut store = OfflineStore::new(Box::new(backend), 10);
        let restored = store.restore_on_startup();
        assert_eq!(numbers(&restored), vec![7, 8]);

        // The snapshot was cleared: a second restore finds nothing.
        assert!(store.restore_on_startup().is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_clears_store() {
        let mut backend = MemoryStore::new();
        backend.write(OFFLINE_KEY, b"{ not json").unwrap();

        let mut store = OfflineStore::new(Box::new(backend), 10);
        assert!(store.restore_on_startup().is_empty());
        assert!(store.restore_on_startup().is_empty());
    }

    #[test]
    fn test_broken_backend_degrades_to_memory() {
        let mut store = OfflineStore::new(Box::new(BrokenBackend), 10);

        assert!(store.restore_on_startup().is_empty());

        store.push(vec![record(1), record(2)]);
        assert_eq!(store.len(), 2);

        // Records stay drainable even though nothing persisted.
        assert_eq!(numbers(&store.take_all()), vec![1, 2]);
    }

    #[test]
    fn test_snapshot_mirrors_after_each_push() {
        let mut store = OfflineStore::new(Box::new(MemoryStore::new()), 10);
        store.push(vec![record(1)]);
        store.push(vec![record(2)]);

        let bytes = store.backend.read(OFFLINE_KEY).unwrap().unwrap();
        let decoded: Vec<TelemetryRecord> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(numbers(&decoded), vec![1, 2]);

        // Draining clears the durable snapshot too.
        store.take_all();
        assert!(store.backend.read(OFFLINE_KEY).unwrap().is_none());
    }
}
