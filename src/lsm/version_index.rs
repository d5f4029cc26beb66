use std::{collections::HashMap, path::Path};

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::AsyncWriteExt;

use crate::{
    id::{RecordId, RECORD_ID_LEN},
    lsm::table::TableError,
};

const INDEX_MAGIC: &[u8; 4] = b"sidx";
const INDEX_FORMAT_VERSION: u8 = 1;

/// Persistent sidecar mapping record id to the highest version stored in
/// one on-disk table.
///
/// Written exactly once, immediately after the table file commits; read
/// back during insert-time version probes. The layout is a fixed header
/// followed by `(20-byte id, u64 version)` entries.
pub struct VersionIndex;

impl VersionIndex {
    /// Atomically create a new index file at `path` from `map`.
    ///
    /// Refuses to overwrite: an existing file at `path` is an error, which
    /// is how file-token collisions are detected.
    pub async fn write(map: &HashMap<RecordId, u64>, path: &Path) -> Result<(), TableError> {
        let mut buf = BytesMut::with_capacity(13 + map.len() * (RECORD_ID_LEN + 8));
        buf.put_slice(INDEX_MAGIC);
        buf.put_u8(INDEX_FORMAT_VERSION);
        buf.put_u64(map.len() as u64);
        for (id, version) in map {
            buf.put_slice(id.as_bytes());
            buf.put_u64(*version);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(&buf).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Merge the on-disk entries at `path` into `map`, taking the max
    /// version per key.
    ///
    /// Only keys already present in `map` are touched; the on-disk index
    /// never introduces new keys into a probe.
    pub async fn lookup(map: &mut HashMap<RecordId, u64>, path: &Path) -> Result<(), TableError> {
        let raw = tokio::fs::read(path).await?;
        let mut buf = raw.as_slice();

        if buf.remaining() < 13 || &buf[..4] != INDEX_MAGIC {
            return Err(TableError::CorruptIndex("bad header"));
        }
        buf.advance(4);
        if buf.get_u8() != INDEX_FORMAT_VERSION {
            return Err(TableError::CorruptIndex("unsupported format version"));
        }
        let count = buf.get_u64() as usize;
        if buf.remaining() != count * (RECORD_ID_LEN + 8) {
            return Err(TableError::CorruptIndex("entry count mismatch"));
        }

        for _ in 0..count {
            let mut id = [0u8; RECORD_ID_LEN];
            buf.copy_to_slice(&mut id);
            let version = buf.get_u64();
            if let Some(known) = map.get_mut(&RecordId::new(id)) {
                if version > *known {
                    *known = version;
                }
            }
        }
        Ok(())
    }
}
