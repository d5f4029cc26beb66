use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_lock::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    config::PartitionConfig,
    id::RecordId,
    lsm::{
        table::{INDEX_EXT, TABLE_EXT},
        RecordArena,
    },
};

/// Name of the snapshot metadata file within a partition directory.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// Reference to one immutable on-disk table: an opaque token naming a
/// `<token>.cst` file and its `<token>.idx` sidecar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsmTableRef {
    filename: String,
}

impl LsmTableRef {
    /// Wrap a file token.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }

    /// The opaque file token.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Path of the columnar table file under `base`.
    pub fn table_path(&self, base: &Path) -> PathBuf {
        base.join(format!("{}.{TABLE_EXT}", self.filename))
    }

    /// Path of the version index sidecar under `base`.
    pub fn index_path(&self, base: &Path) -> PathBuf {
        base.join(format!("{}.{INDEX_EXT}", self.filename))
    }
}

/// Errors from snapshot metadata persistence.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Metadata file read/write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Metadata file did not parse.
    #[error("snapshot metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct SnapshotMeta {
    namespace: String,
    table_name: String,
    partition_id: String,
    tables: Vec<LsmTableRef>,
}

/// Immutable descriptor of a partition's state.
///
/// Snapshots are plain values published through a [`SnapshotCell`]; they
/// hold no back-pointer to the writer that produced them. Cloning shares
/// the arenas and deep-copies the table list, which is exactly the
/// copy-on-write discipline the writer relies on.
#[derive(Clone)]
pub struct PartitionSnapshot {
    base_path: PathBuf,
    namespace: String,
    table_name: String,
    partition_id: RecordId,
    pub(crate) head_arena: Arc<RecordArena>,
    pub(crate) compacting_arena: Option<Arc<RecordArena>>,
    pub(crate) tables: Vec<LsmTableRef>,
}

impl PartitionSnapshot {
    /// Fresh empty snapshot for a partition that has no on-disk state yet.
    pub fn create(config: &PartitionConfig) -> Self {
        Self {
            base_path: config.base_path().to_path_buf(),
            namespace: config.namespace().to_string(),
            table_name: config.table_name().to_string(),
            partition_id: config.partition_id(),
            head_arena: Arc::new(RecordArena::new()),
            compacting_arena: None,
            tables: Vec::new(),
        }
    }

    /// Reopen a partition from its metadata file, with fresh empty arenas.
    ///
    /// Table files on disk that the metadata does not list (flush orphans)
    /// are simply not referenced.
    pub async fn load(config: &PartitionConfig) -> Result<Self, SnapshotError> {
        let raw = tokio::fs::read(config.base_path().join(SNAPSHOT_FILE)).await?;
        let meta: SnapshotMeta = serde_json::from_slice(&raw)?;
        Ok(Self {
            base_path: config.base_path().to_path_buf(),
            namespace: meta.namespace,
            table_name: meta.table_name,
            partition_id: config.partition_id(),
            head_arena: Arc::new(RecordArena::new()),
            compacting_arena: None,
            tables: meta.tables,
        })
    }

    /// Persist the snapshot metadata, atomically replacing any prior file.
    pub async fn write_to_disk(&self) -> Result<(), SnapshotError> {
        let meta = SnapshotMeta {
            namespace: self.namespace.clone(),
            table_name: self.table_name.clone(),
            partition_id: self.partition_id.to_hex(),
            tables: self.tables.clone(),
        };
        let raw = serde_json::to_vec_pretty(&meta)?;

        let path = self.base_path.join(SNAPSHOT_FILE);
        let tmp = self.base_path.join(format!("{SNAPSHOT_FILE}.tmp"));
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Directory holding this partition's files.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Namespace of the owning table.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the owning table.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Identity key of this partition.
    pub fn partition_id(&self) -> RecordId {
        self.partition_id
    }

    /// The writable head arena.
    pub fn head_arena(&self) -> &Arc<RecordArena> {
        &self.head_arena
    }

    /// The read-only arena currently being flushed, if any.
    pub fn compacting_arena(&self) -> Option<&Arc<RecordArena>> {
        self.compacting_arena.as_ref()
    }

    /// Ordered list of on-disk tables, oldest first.
    pub fn tables(&self) -> &[LsmTableRef] {
        &self.tables
    }
}

/// Holder of the current snapshot of one partition.
///
/// Readers take a cheap `Arc` clone of a consistent snapshot; writers
/// publish a replacement wholesale. All publication happens under the
/// partition writer's mutex, so the cell itself only needs a read/write
/// lock.
pub struct SnapshotCell {
    inner: RwLock<Arc<PartitionSnapshot>>,
}

impl SnapshotCell {
    /// Wrap an initial snapshot.
    pub fn new(snapshot: PartitionSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot.
    pub async fn get(&self) -> Arc<PartitionSnapshot> {
        self.inner.read().await.clone()
    }

    pub(crate) async fn set(&self, snapshot: Arc<PartitionSnapshot>) {
        *self.inner.write().await = snapshot;
    }
}
