//! In-memory storage backend for development and testing

use crate::{DirectoryRecord, DirectoryStore, StorageError};
use dashmap::DashMap;
use mesh_wire::NodeIdentity;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// In-memory directory store; clones share the same contents
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Saved records by identity
    records: Arc<DashMap<NodeIdentity, DirectoryRecord>>,
    /// Number of completed saves
    saves: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots saved so far
    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }
}

impl DirectoryStore for MemoryStore {
    fn load(&self) -> Result<Vec<DirectoryRecord>, StorageError> {
        let mut records: Vec<DirectoryRecord> =
            self.records.iter().map(|entry| *entry.value()).collect();
        records.sort_by_key(|record| record.identity);
        Ok(records)
    }

    fn save(&self, records: &[DirectoryRecord]) -> Result<(), StorageError> {
        debug!("Directory snapshot saved in memory ({} records)", records.len());
        self.records.clear();
        for record in records {
            self.records.insert(record.identity, *record);
        }
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::LogicalAddress;

    fn record(id: u8, addr: u16) -> DirectoryRecord {
        DirectoryRecord {
            identity: NodeIdentity::new(id).unwrap(),
            address: LogicalAddress::new(addr).unwrap(),
            is_static: false,
        }
    }

    #[test]
    fn test_save_replaces_snapshot() {
        let store = MemoryStore::new();
        store.save(&[record(7, 0o2), record(4, 0o1)]).unwrap();
        assert_eq!(store.load().unwrap(), vec![record(4, 0o1), record(7, 0o2)]);

        store.save(&[record(9, 0o3)]).unwrap();
        assert_eq!(store.load().unwrap(), vec![record(9, 0o3)]);
        assert_eq!(store.saves(), 2);
    }

    #[test]
    fn test_clones_share_contents() {
        let store = MemoryStore::new();
        let view = store.clone();
        store.save(&[record(1, 0o1)]).unwrap();
        assert_eq!(view.load().unwrap().len(), 1);
    }
}
