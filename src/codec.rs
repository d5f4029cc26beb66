//! Wire codec for record payloads.
//!
//! A record travels through ingestion as an opaque byte payload. Only at
//! flush time is it decoded against the table schema into a structural
//! [`Row`] and shredded into columns. The layout is a field count followed
//! by one tagged value per field; tags double as a type check against the
//! schema during decode.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::schema::{ScalarKind, TableSchema};

/// A single decoded field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absent value; only legal for nullable fields.
    Null,
    /// Boolean field.
    Bool(bool),
    /// Signed 64-bit integer field.
    Int(i64),
    /// Unsigned 64-bit integer field.
    UInt(u64),
    /// 64-bit float field.
    Float(f64),
    /// UTF-8 string field.
    Str(String),
    /// Raw binary field.
    Bytes(Bytes),
}

impl Value {
    /// The schema kind this value satisfies, or `None` for null.
    pub fn kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::Int(_) => Some(ScalarKind::Int),
            Value::UInt(_) => Some(ScalarKind::UInt),
            Value::Float(_) => Some(ScalarKind::Float),
            Value::Str(_) => Some(ScalarKind::Str),
            Value::Bytes(_) => Some(ScalarKind::Bytes),
        }
    }
}

/// A decoded record: one value per schema field, in schema order.
pub type Row = Vec<Value>;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_UINT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_BYTES: u8 = 6;

/// Decode failure; surfacing one of these aborts the flush that hit it.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload ended before the announced content.
    #[error("payload truncated")]
    Truncated,
    /// Unrecognized value tag byte.
    #[error("unknown value tag {0:#04x}")]
    UnknownTag(u8),
    /// Payload field count does not match the schema.
    #[error("field count mismatch: schema has {expected}, payload has {actual}")]
    FieldCount {
        /// Field count the schema requires.
        expected: usize,
        /// Field count found in the payload.
        actual: usize,
    },
    /// A value's tag does not match the schema kind for its position.
    #[error("field {field:?} expects {expected}")]
    TypeMismatch {
        /// Name of the offending field.
        field: String,
        /// Kind the schema declares.
        expected: ScalarKind,
    },
    /// Null payload value for a non-nullable field.
    #[error("field {field:?} is not nullable")]
    NullViolation {
        /// Name of the offending field.
        field: String,
    },
    /// String field carried invalid UTF-8.
    #[error("invalid utf-8 in string field")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Encode a row into its opaque payload form.
pub fn encode_row(row: &Row) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u16(row.len() as u16);
    for value in row {
        match value {
            Value::Null => buf.put_u8(TAG_NULL),
            Value::Bool(v) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(u8::from(*v));
            }
            Value::Int(v) => {
                buf.put_u8(TAG_INT);
                buf.put_i64(*v);
            }
            Value::UInt(v) => {
                buf.put_u8(TAG_UINT);
                buf.put_u64(*v);
            }
            Value::Float(v) => {
                buf.put_u8(TAG_FLOAT);
                buf.put_f64(*v);
            }
            Value::Str(v) => {
                buf.put_u8(TAG_STR);
                buf.put_u32(v.len() as u32);
                buf.put_slice(v.as_bytes());
            }
            Value::Bytes(v) => {
                buf.put_u8(TAG_BYTES);
                buf.put_u32(v.len() as u32);
                buf.put_slice(v);
            }
        }
    }
    buf.freeze()
}

/// Decode an opaque payload against `schema`, checking arity, types and
/// nullability.
pub fn decode_row(schema: &TableSchema, payload: &[u8]) -> Result<Row, CodecError> {
    let mut buf = payload;
    let actual = usize::from(take_u16(&mut buf)?);
    if actual != schema.fields().len() {
        return Err(CodecError::FieldCount {
            expected: schema.fields().len(),
            actual,
        });
    }

    let mut row = Row::with_capacity(actual);
    for field in schema.fields() {
        let tag = take_u8(&mut buf)?;
        if tag == TAG_NULL {
            if !field.nullable {
                return Err(CodecError::NullViolation {
                    field: field.name.clone(),
                });
            }
            row.push(Value::Null);
            continue;
        }

        let value = match tag {
            TAG_BOOL => Value::Bool(take_u8(&mut buf)? != 0),
            TAG_INT => Value::Int(take_i64(&mut buf)?),
            TAG_UINT => Value::UInt(take_u64(&mut buf)?),
            TAG_FLOAT => Value::Float(take_f64(&mut buf)?),
            TAG_STR => {
                let raw = take_blob(&mut buf)?;
                Value::Str(String::from_utf8(raw)?)
            }
            TAG_BYTES => Value::Bytes(Bytes::from(take_blob(&mut buf)?)),
            other => return Err(CodecError::UnknownTag(other)),
        };

        if value.kind() != Some(field.kind) {
            return Err(CodecError::TypeMismatch {
                field: field.name.clone(),
                expected: field.kind,
            });
        }
        row.push(value);
    }
    Ok(row)
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    ensure(*buf, 1)?;
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> Result<u16, CodecError> {
    ensure(*buf, 2)?;
    Ok(buf.get_u16())
}

fn take_i64(buf: &mut &[u8]) -> Result<i64, CodecError> {
    ensure(*buf, 8)?;
    Ok(buf.get_i64())
}

fn take_u64(buf: &mut &[u8]) -> Result<u64, CodecError> {
    ensure(*buf, 8)?;
    Ok(buf.get_u64())
}

fn take_f64(buf: &mut &[u8]) -> Result<f64, CodecError> {
    ensure(*buf, 8)?;
    Ok(buf.get_f64())
}

fn take_blob(buf: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
    ensure(*buf, 4)?;
    let len = buf.get_u32() as usize;
    ensure(*buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    Ok(raw)
}

fn ensure(buf: &[u8], len: usize) -> Result<(), CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    Ok(())
}
