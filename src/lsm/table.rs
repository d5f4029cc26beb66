use std::{collections::HashMap, path::Path, sync::Arc};

use arrow_array::{
    builder::{
        BinaryBuilder, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder, UInt64Builder,
    },
    Array, ArrayRef, BooleanArray, RecordBatch, StringArray, UInt64Array,
};
use arrow_schema::ArrowError;
use futures_util::TryStreamExt;
use parquet::{
    arrow::{AsyncArrowWriter, ParquetRecordBatchStreamBuilder},
    errors::ParquetError,
    file::properties::WriterProperties,
};

use crate::{
    codec::{self, CodecError, Value},
    id::RecordId,
    lsm::{version_index::VersionIndex, RecordArena},
    schema::{ScalarKind, TableSchema, COL_IS_UPDATE, COL_RECORD_ID, COL_RECORD_VERSION},
};

/// Extension of the columnar table file.
pub const TABLE_EXT: &str = "cst";
/// Extension of the version index sidecar.
pub const INDEX_EXT: &str = "idx";

/// Errors from the columnar write/read path.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// File create/read/write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Parquet serialization failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// Arrow batch construction failed.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// A record payload did not decode against the table schema.
    #[error("record decode failed: {0}")]
    Decode(#[from] CodecError),
    /// The `.idx` sidecar is unreadable.
    #[error("corrupt version index: {0}")]
    CorruptIndex(&'static str),
    /// A table file is missing an expected column.
    #[error("unexpected table layout: {0}")]
    Layout(&'static str),
}

enum ColumnShredder {
    Bool(BooleanBuilder),
    Int(Int64Builder),
    UInt(UInt64Builder),
    Float(Float64Builder),
    Str(StringBuilder),
    Bytes(BinaryBuilder),
}

impl ColumnShredder {
    fn for_kind(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => ColumnShredder::Bool(BooleanBuilder::new()),
            ScalarKind::Int => ColumnShredder::Int(Int64Builder::new()),
            ScalarKind::UInt => ColumnShredder::UInt(UInt64Builder::new()),
            ScalarKind::Float => ColumnShredder::Float(Float64Builder::new()),
            ScalarKind::Str => ColumnShredder::Str(StringBuilder::new()),
            ScalarKind::Bytes => ColumnShredder::Bytes(BinaryBuilder::new()),
        }
    }

    fn append(&mut self, value: &Value) -> Result<(), TableError> {
        match (self, value) {
            (ColumnShredder::Bool(b), Value::Bool(v)) => b.append_value(*v),
            (ColumnShredder::Int(b), Value::Int(v)) => b.append_value(*v),
            (ColumnShredder::UInt(b), Value::UInt(v)) => b.append_value(*v),
            (ColumnShredder::Float(b), Value::Float(v)) => b.append_value(*v),
            (ColumnShredder::Str(b), Value::Str(v)) => b.append_value(v),
            (ColumnShredder::Bytes(b), Value::Bytes(v)) => b.append_value(v),
            (ColumnShredder::Bool(b), Value::Null) => b.append_null(),
            (ColumnShredder::Int(b), Value::Null) => b.append_null(),
            (ColumnShredder::UInt(b), Value::Null) => b.append_null(),
            (ColumnShredder::Float(b), Value::Null) => b.append_null(),
            (ColumnShredder::Str(b), Value::Null) => b.append_null(),
            (ColumnShredder::Bytes(b), Value::Null) => b.append_null(),
            // decode_row has already type-checked the row against the schema.
            _ => return Err(TableError::Layout("value kind drifted from schema")),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnShredder::Bool(b) => Arc::new(b.finish()),
            ColumnShredder::Int(b) => Arc::new(b.finish()),
            ColumnShredder::UInt(b) => Arc::new(b.finish()),
            ColumnShredder::Float(b) => Arc::new(b.finish()),
            ColumnShredder::Str(b) => Arc::new(b.finish()),
            ColumnShredder::Bytes(b) => Arc::new(b.finish()),
        }
    }
}

/// Serializes a batch of records into an immutable columnar table file plus
/// its version index sidecar.
///
/// File order matters: the `.cst` commits first, the `.idx` second. A crash
/// in between leaves files no snapshot references.
pub struct TableWriter<'a> {
    schema: &'a TableSchema,
    properties: WriterProperties,
}

impl<'a> TableWriter<'a> {
    /// Bind a writer to a table schema and parquet properties.
    pub fn new(schema: &'a TableSchema, properties: WriterProperties) -> Self {
        Self { schema, properties }
    }

    /// Flush an arena to `<stem>.cst` + `<stem>.idx`.
    ///
    /// Every payload is decoded against the schema before any file is
    /// created, so a decode failure leaves no partial output behind.
    pub async fn write_arena(&self, arena: &RecordArena, stem: &Path) -> Result<(), TableError> {
        let mut records = Vec::with_capacity(arena.size());
        arena.fetch_records(|r| records.push(r));

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(codec::decode_row(self.schema, &record.payload)?);
        }

        let mut shredders: Vec<ColumnShredder> = self
            .schema
            .fields()
            .iter()
            .map(|f| ColumnShredder::for_kind(f.kind))
            .collect();
        let mut is_update = BooleanBuilder::new();
        let mut ids = StringBuilder::new();
        let mut versions = UInt64Builder::new();
        let mut vmap = HashMap::with_capacity(records.len());

        for (record, row) in records.iter().zip(&rows) {
            for (shredder, value) in shredders.iter_mut().zip(row) {
                shredder.append(value)?;
            }
            is_update.append_value(record.is_update);
            ids.append_value(record.record_id.to_hex());
            versions.append_value(record.record_version);
            vmap.insert(record.record_id, record.record_version);
        }

        let mut columns: Vec<ArrayRef> = shredders.iter_mut().map(|s| s.finish()).collect();
        columns.push(Arc::new(is_update.finish()));
        columns.push(Arc::new(ids.finish()));
        columns.push(Arc::new(versions.finish()));
        let batch = RecordBatch::try_new(self.schema.arrow_schema_with_extensions(), columns)?;

        self.write_files(&[batch], &vmap, stem).await
    }

    /// Write prepared batches (already carrying the extension columns) and
    /// their version map. Used by compaction strategies.
    pub async fn write_batches(
        &self,
        batches: &[RecordBatch],
        vmap: &HashMap<RecordId, u64>,
        stem: &Path,
    ) -> Result<(), TableError> {
        self.write_files(batches, vmap, stem).await
    }

    async fn write_files(
        &self,
        batches: &[RecordBatch],
        vmap: &HashMap<RecordId, u64>,
        stem: &Path,
    ) -> Result<(), TableError> {
        let table_path = stem.with_extension(TABLE_EXT);
        let index_path = stem.with_extension(INDEX_EXT);

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&table_path)
            .await?;
        let schema = batches
            .first()
            .map(|b| b.schema())
            .unwrap_or_else(|| self.schema.arrow_schema_with_extensions());
        let mut writer = AsyncArrowWriter::try_new(file, schema, Some(self.properties.clone()))?;
        for batch in batches {
            writer.write(batch).await?;
        }
        writer.close().await?;

        VersionIndex::write(vmap, &index_path).await?;
        Ok(())
    }
}

/// Read every batch of a `.cst` table file.
pub async fn read_table(path: &Path) -> Result<Vec<RecordBatch>, TableError> {
    let file = tokio::fs::File::open(path).await?;
    let stream = ParquetRecordBatchStreamBuilder::new(file).await?.build()?;
    Ok(stream.try_collect().await?)
}

pub(crate) struct ExtensionColumns<'a> {
    pub(crate) is_update: &'a BooleanArray,
    pub(crate) ids: &'a StringArray,
    pub(crate) versions: &'a UInt64Array,
}

pub(crate) fn extension_columns(batch: &RecordBatch) -> Result<ExtensionColumns<'_>, TableError> {
    let is_update = batch
        .column_by_name(COL_IS_UPDATE)
        .and_then(|a| a.as_any().downcast_ref::<BooleanArray>())
        .ok_or(TableError::Layout("missing __lsm_is_update column"))?;
    let ids = batch
        .column_by_name(COL_RECORD_ID)
        .and_then(|a| a.as_any().downcast_ref::<StringArray>())
        .ok_or(TableError::Layout("missing __lsm_id column"))?;
    let versions = batch
        .column_by_name(COL_RECORD_VERSION)
        .and_then(|a| a.as_any().downcast_ref::<UInt64Array>())
        .ok_or(TableError::Layout("missing __lsm_version column"))?;
    Ok(ExtensionColumns {
        is_update,
        ids,
        versions,
    })
}
