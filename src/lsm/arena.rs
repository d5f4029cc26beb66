use std::{collections::HashMap, sync::RwLock};

use bytes::Bytes;

use crate::{id::RecordId, record::RecordRef};

struct ArenaEntry {
    version: u64,
    payload: Bytes,
    is_update: bool,
}

/// In-memory, append-only store of pending records, deduplicated by record
/// id with the highest version retained.
///
/// An arena is shared between the partition writer and any snapshots that
/// reference it; the interior lock covers only the map itself. State
/// (head / compacting / discarded) is tracked by the owning snapshot, not
/// here.
pub struct RecordArena {
    records: RwLock<HashMap<RecordId, ArenaEntry>>,
}

impl RecordArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a record, keeping the highest version per id.
    ///
    /// Returns true iff the record was retained: it was new, or it replaced
    /// an older version. Inserts with `version <= existing` are no-ops and
    /// do not bump any counter.
    pub fn insert(&self, record: &RecordRef) -> bool {
        let mut records = self
            .records
            .write()
            .expect("record arena lock should not be poisoned");
        match records.get(&record.record_id) {
            Some(existing) if record.record_version <= existing.version => false,
            _ => {
                records.insert(
                    record.record_id,
                    ArenaEntry {
                        version: record.record_version,
                        payload: record.payload.clone(),
                        is_update: record.is_update,
                    },
                );
                true
            }
        }
    }

    /// Highest version held for `id`, or 0 when absent.
    pub fn fetch_record_version(&self, id: &RecordId) -> u64 {
        self.records
            .read()
            .expect("record arena lock should not be poisoned")
            .get(id)
            .map(|entry| entry.version)
            .unwrap_or(0)
    }

    /// Number of distinct record ids currently held.
    pub fn size(&self) -> usize {
        self.records
            .read()
            .expect("record arena lock should not be poisoned")
            .len()
    }

    /// Visit every retained record, in unspecified order.
    pub fn fetch_records<F>(&self, mut visitor: F)
    where
        F: FnMut(RecordRef),
    {
        let records = self
            .records
            .read()
            .expect("record arena lock should not be poisoned");
        for (id, entry) in records.iter() {
            visitor(RecordRef {
                record_id: *id,
                record_version: entry.version,
                payload: entry.payload.clone(),
                is_update: entry.is_update,
            });
        }
    }
}

impl Default for RecordArena {
    fn default() -> Self {
        Self::new()
    }
}
