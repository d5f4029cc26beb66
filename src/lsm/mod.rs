//! LSM partition storage: in-memory arenas, columnar on-disk tables with
//! version sidecars, immutable snapshots, and the partition writer that
//! evolves them.

mod arena;
pub mod compaction;
mod snapshot;
mod table;
mod version_index;
mod writer;

pub use arena::RecordArena;
pub use snapshot::{LsmTableRef, PartitionSnapshot, SnapshotCell, SnapshotError, SNAPSHOT_FILE};
pub use table::{read_table, TableError, TableWriter, INDEX_EXT, TABLE_EXT};
pub use version_index::VersionIndex;
pub use writer::{LsmPartitionWriter, PartitionError};
