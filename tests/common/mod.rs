#![allow(dead_code)]

use std::path::Path;

use bytes::Bytes;
use strata::{
    codec::{encode_row, Value},
    id::RECORD_ID_LEN,
    schema::{FieldDef, ScalarKind},
    PartitionConfig, RecordId, RecordRef, TableSchema,
};

pub fn schema() -> TableSchema {
    TableSchema::new(vec![
        FieldDef::required("metric", ScalarKind::Str),
        FieldDef::required("value", ScalarKind::UInt),
    ])
}

pub fn config(base_path: &Path) -> PartitionConfig {
    PartitionConfig::new(
        base_path,
        "analytics",
        "events",
        RecordId::new([0x42; RECORD_ID_LEN]),
    )
}

pub fn id(byte: u8) -> RecordId {
    RecordId::new([byte; RECORD_ID_LEN])
}

pub fn record(id_byte: u8, version: u64) -> RecordRef {
    RecordRef::new(
        id(id_byte),
        version,
        encode_row(&vec![
            Value::Str(format!("metric-{id_byte}")),
            Value::UInt(version * 100),
        ]),
    )
}

pub fn raw_record(record_id: RecordId, version: u64, payload: Bytes) -> RecordRef {
    RecordRef::new(record_id, version, payload)
}
