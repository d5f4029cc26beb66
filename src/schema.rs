//! Table schema model and its Arrow projection.
//!
//! The engine stores user columns exactly as declared plus three extension
//! columns that never appear in the user schema: the update flag, the
//! hex-encoded record id, and the record version. Readers rely on the
//! extension columns to reconcile versions across tables.

use std::{fmt, sync::Arc};

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

/// Extension column: whether the row replaced an earlier version.
pub const COL_IS_UPDATE: &str = "__lsm_is_update";
/// Extension column: hex-encoded 160-bit record id.
pub const COL_RECORD_ID: &str = "__lsm_id";
/// Extension column: record version.
pub const COL_RECORD_VERSION: &str = "__lsm_version";

/// Scalar type of a user column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarKind {
    /// Boolean column.
    Bool,
    /// Signed 64-bit integer column.
    Int,
    /// Unsigned 64-bit integer column.
    UInt,
    /// 64-bit float column.
    Float,
    /// UTF-8 string column.
    Str,
    /// Raw binary column.
    Bytes,
}

impl ScalarKind {
    fn data_type(&self) -> DataType {
        match self {
            ScalarKind::Bool => DataType::Boolean,
            ScalarKind::Int => DataType::Int64,
            ScalarKind::UInt => DataType::UInt64,
            ScalarKind::Float => DataType::Float64,
            ScalarKind::Str => DataType::Utf8,
            ScalarKind::Bytes => DataType::Binary,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::UInt => "uint",
            ScalarKind::Float => "float",
            ScalarKind::Str => "string",
            ScalarKind::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// One user column declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// Column scalar type.
    pub kind: ScalarKind,
    /// Whether null values are accepted.
    pub nullable: bool,
}

impl FieldDef {
    /// Declare a non-nullable column.
    pub fn required(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    /// Declare a nullable column.
    pub fn nullable(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }
}

/// Ordered set of user columns for one table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    fields: Vec<FieldDef>,
}

impl TableSchema {
    /// Build a schema from its column declarations.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// The user columns, in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Arrow schema of the user columns only.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(self.arrow_fields()))
    }

    /// Arrow schema of the user columns followed by the extension columns.
    ///
    /// This is the layout of every on-disk table file.
    pub fn arrow_schema_with_extensions(&self) -> SchemaRef {
        let mut fields = self.arrow_fields();
        fields.push(Field::new(COL_IS_UPDATE, DataType::Boolean, false));
        fields.push(Field::new(COL_RECORD_ID, DataType::Utf8, false));
        fields.push(Field::new(COL_RECORD_VERSION, DataType::UInt64, false));
        Arc::new(Schema::new(fields))
    }

    fn arrow_fields(&self) -> Vec<Field> {
        self.fields
            .iter()
            .map(|f| Field::new(f.name.clone(), f.kind.data_type(), f.nullable))
            .collect()
    }
}
