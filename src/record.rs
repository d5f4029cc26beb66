use bytes::Bytes;

use crate::id::RecordId;

/// One versioned record as handed to the partition writer.
///
/// The payload is opaque until flush; see [`crate::codec`]. `is_update` is
/// derived during insert when any prior non-zero version of the id is known
/// to exist anywhere in the partition.
#[derive(Clone, Debug)]
pub struct RecordRef {
    /// 160-bit record identity.
    pub record_id: RecordId,
    /// Monotonic version of this record; higher wins.
    pub record_version: u64,
    /// Opaque encoded payload.
    pub payload: Bytes,
    /// Whether this record replaces an earlier version.
    pub is_update: bool,
}

impl RecordRef {
    /// Build a record as received from ingestion; `is_update` starts false
    /// and is derived on insert.
    pub fn new(record_id: RecordId, record_version: u64, payload: Bytes) -> Self {
        Self {
            record_id,
            record_version,
            payload,
            is_update: false,
        }
    }
}
