use std::{
    fmt::{Debug, Formatter},
    path::{Path, PathBuf},
};

use parquet::{basic::Compression, file::properties::WriterProperties};

use crate::id::RecordId;

/// Operating parameters of a single partition.
///
/// Identity (`namespace`, `table_name`, `partition_id`) comes from the
/// external config directory; the engine treats it as opaque labels for
/// logging and snapshot metadata.
#[derive(Clone)]
pub struct PartitionConfig {
    /// Directory holding the partition's table files and snapshot metadata.
    pub(crate) base_path: PathBuf,

    /// Namespace the owning table belongs to.
    pub(crate) namespace: String,

    /// Name of the owning table.
    pub(crate) table_name: String,

    /// Identity key of this partition.
    pub(crate) partition_id: RecordId,

    /// Parquet writer properties for on-disk table files.
    pub(crate) write_parquet_properties: WriterProperties,
}

impl PartitionConfig {
    /// Build the default configuration for a partition rooted at `base_path`.
    pub fn new(
        base_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
        table_name: impl Into<String>,
        partition_id: RecordId,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            namespace: namespace.into(),
            table_name: table_name.into(),
            partition_id,
            write_parquet_properties: WriterProperties::builder()
                .set_compression(Compression::LZ4)
                .set_created_by(concat!("strata version ", env!("CARGO_PKG_VERSION")).to_owned())
                .build(),
        }
    }

    /// Override the parquet writer properties used for table files.
    pub fn with_parquet_properties(mut self, properties: WriterProperties) -> Self {
        self.write_parquet_properties = properties;
        self
    }

    /// Directory holding the partition's files.
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
}

impl Debug for PartitionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionConfig")
            .field("base_path", &self.base_path)
            .field("namespace", &self.namespace)
            .field("table_name", &self.table_name)
            .field("partition_id", &self.partition_id)
            .finish()
    }
}
