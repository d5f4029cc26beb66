//! Pluggable compaction strategies.
//!
//! A strategy is a pure capability from the captured table list to its
//! replacement: it may rewrite a prefix of the list into new tables or
//! return the list unchanged. The partition writer owns the install step
//! and its concurrent-modification check; strategies only produce files.

use std::collections::HashMap;

use arrow_array::{RecordBatch, UInt32Array};
use arrow_select::{concat::concat_batches, take::take};
use async_trait::async_trait;
use log::Level;

use crate::{
    config::PartitionConfig,
    id::{random_file_token, RecordId},
    logging::strata_log,
    lsm::{
        table::{extension_columns, read_table, TableError, TableWriter},
        writer::PartitionError,
        LsmTableRef,
    },
    schema::TableSchema,
};

/// Produces the replacement table list for a compaction pass.
#[async_trait]
pub trait CompactionStrategy: Send + Sync {
    /// Rewrite `old_tables` into a new list.
    ///
    /// The result must either keep `old_tables` identical or replace it
    /// wholesale with newly written tables; partial prefixes are installed
    /// by the writer, which preserves any table appended concurrently.
    async fn compact(
        &self,
        config: &PartitionConfig,
        schema: &TableSchema,
        old_tables: &[LsmTableRef],
    ) -> Result<Vec<LsmTableRef>, PartitionError>;
}

/// Keeps the table list exactly as captured.
pub struct NoopStrategy;

#[async_trait]
impl CompactionStrategy for NoopStrategy {
    async fn compact(
        &self,
        _config: &PartitionConfig,
        _schema: &TableSchema,
        old_tables: &[LsmTableRef],
    ) -> Result<Vec<LsmTableRef>, PartitionError> {
        Ok(old_tables.to_vec())
    }
}

/// Rewrites the whole captured list into a single table, keeping only the
/// highest version of every record id.
pub struct MergeAllStrategy;

#[async_trait]
impl CompactionStrategy for MergeAllStrategy {
    async fn compact(
        &self,
        config: &PartitionConfig,
        schema: &TableSchema,
        old_tables: &[LsmTableRef],
    ) -> Result<Vec<LsmTableRef>, PartitionError> {
        if old_tables.len() < 2 {
            return Ok(old_tables.to_vec());
        }

        // Tables are ordered oldest first; concatenating in list order lets
        // a later row win version ties below.
        let mut batches = Vec::new();
        for table in old_tables {
            batches.extend(read_table(&table.table_path(config.base_path())).await?);
        }
        let full_schema = schema.arrow_schema_with_extensions();
        let merged = concat_batches(&full_schema, &batches).map_err(TableError::Arrow)?;

        let ext = extension_columns(&merged)?;
        let mut best: HashMap<RecordId, (u64, u32)> = HashMap::new();
        for row in 0..merged.num_rows() {
            let id = RecordId::from_hex(ext.ids.value(row))
                .map_err(|_| TableError::Layout("bad __lsm_id value"))?;
            let version = ext.versions.value(row);
            match best.get(&id) {
                Some((kept, _)) if *kept > version => {}
                _ => {
                    best.insert(id, (version, row as u32));
                }
            }
        }

        let mut keep: Vec<u32> = best.values().map(|(_, row)| *row).collect();
        keep.sort_unstable();
        let indices = UInt32Array::from(keep);
        let columns = merged
            .columns()
            .iter()
            .map(|column| take(column.as_ref(), &indices, None))
            .collect::<Result<Vec<_>, _>>()
            .map_err(TableError::Arrow)?;
        let rewritten =
            RecordBatch::try_new(full_schema, columns).map_err(TableError::Arrow)?;

        let vmap: HashMap<RecordId, u64> = best
            .iter()
            .map(|(id, (version, _))| (*id, *version))
            .collect();
        let token = random_file_token();
        let writer = TableWriter::new(schema, config.write_parquet_properties.clone());
        writer
            .write_batches(&[rewritten], &vmap, &config.base_path().join(&token))
            .await?;

        strata_log!(
            Level::Debug,
            "compact-rewrite",
            "merged {} tables into {} ({} records)",
            old_tables.len(),
            token,
            vmap.len(),
        );
        Ok(vec![LsmTableRef::new(token)])
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{
        codec::{encode_row, Value},
        record::RecordRef,
        schema::{FieldDef, ScalarKind},
        lsm::RecordArena,
    };

    fn schema() -> TableSchema {
        TableSchema::new(vec![FieldDef::required("value", ScalarKind::UInt)])
    }

    fn config(dir: &TempDir) -> PartitionConfig {
        PartitionConfig::new(
            dir.path(),
            "analytics",
            "events",
            RecordId::new([1; crate::id::RECORD_ID_LEN]),
        )
    }

    async fn write_table(
        config: &PartitionConfig,
        schema: &TableSchema,
        records: &[(u8, u64, u64)],
    ) -> LsmTableRef {
        let arena = RecordArena::new();
        for (id, version, value) in records {
            let mut record = RecordRef::new(
                RecordId::new([*id; crate::id::RECORD_ID_LEN]),
                *version,
                encode_row(&vec![Value::UInt(*value)]),
            );
            record.is_update = *version > 1;
            arena.insert(&record);
        }
        let token = random_file_token();
        TableWriter::new(schema, config.write_parquet_properties.clone())
            .write_arena(&arena, &config.base_path().join(&token))
            .await
            .unwrap();
        LsmTableRef::new(token)
    }

    #[tokio::test]
    async fn noop_keeps_list_identical() {
        let dir = TempDir::new().unwrap();
        let old = vec![LsmTableRef::new("aaaa"), LsmTableRef::new("bbbb")];
        let new = NoopStrategy
            .compact(&config(&dir), &schema(), &old)
            .await
            .unwrap();
        assert_eq!(new, old);
    }

    #[tokio::test]
    async fn merge_keeps_highest_version_per_id() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let schema = schema();

        let t1 = write_table(&config, &schema, &[(1, 1, 10), (2, 1, 20)]).await;
        let t2 = write_table(&config, &schema, &[(1, 3, 11), (3, 1, 30)]).await;

        let new = MergeAllStrategy
            .compact(&config, &schema, &[t1, t2])
            .await
            .unwrap();
        assert_eq!(new.len(), 1);

        let batches = read_table(&new[0].table_path(config.base_path()))
            .await
            .unwrap();
        let merged = concat_batches(&schema.arrow_schema_with_extensions(), &batches).unwrap();
        assert_eq!(merged.num_rows(), 3);

        let ext = extension_columns(&merged).unwrap();
        let mut versions = HashMap::new();
        for row in 0..merged.num_rows() {
            versions.insert(
                RecordId::from_hex(ext.ids.value(row)).unwrap(),
                ext.versions.value(row),
            );
        }
        assert_eq!(versions[&RecordId::new([1; crate::id::RECORD_ID_LEN])], 3);
        assert_eq!(versions[&RecordId::new([2; crate::id::RECORD_ID_LEN])], 1);
        assert_eq!(versions[&RecordId::new([3; crate::id::RECORD_ID_LEN])], 1);
    }

    #[tokio::test]
    async fn merge_leaves_single_table_alone() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let schema = schema();
        let t1 = write_table(&config, &schema, &[(1, 1, 10)]).await;

        let new = MergeAllStrategy
            .compact(&config, &schema, std::slice::from_ref(&t1))
            .await
            .unwrap();
        assert_eq!(new, vec![t1]);
    }
}
