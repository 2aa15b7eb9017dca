//! StreamEvent 바이너리 인코딩/디코딩
//!
//! 모든 정수는 little-endian 입니다.
//!   - Category (1 byte): 1=DML, 2=DDL, 3=ERR, 4=POS
//!   - DML: Timestamp (8) + Table + Field count (2) + Fields + Row count (4) + Rows
//!     - Field: Name + Type (1) + Nullable (1)
//!     - Row: Arity (2) + Values
//!     - Value: Tag (1, 0=NULL 1=INT 2=FLOAT 3=STRING 4=BINARY) + Payload
//!   - DDL / ERR: Timestamp (8) + Text
//!   - POS: Transaction ID
//!   - 문자열/바이트열: Length (4) + Bytes
//!
//! 디코딩 결과는 항상 이벤트 생성자를 통과하므로 유효성 규칙이 동일하게 적용됩니다.

use crate::error::{CdcError, Result, ValidationError};
use crate::events::{EventCategory, StreamEvent};
use crate::value::{FieldSchema, FieldType, TypedValue};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Cursor, Read};

const VALUE_NULL: u8 = 0;
const VALUE_INTEGER: u8 = 1;
const VALUE_FLOAT: u8 = 2;
const VALUE_STRING: u8 = 3;
const VALUE_BINARY: u8 = 4;

/// DML 이벤트 하나에 담을 수 있는 최대 필드 개수 (field count가 u16)
pub const MAX_FIELDS: usize = u16::MAX as usize;

/// 이벤트 인코딩
///
/// 개수/길이가 헤더 폭을 넘으면 잘라 쓰지 않고 `CdcError::Encode`를 반환합니다.
pub fn encode(event: &StreamEvent) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    buf.put_u8(event.category() as u8);

    match event {
        StreamEvent::DataChange(d) => {
            buf.put_i64_le(d.timestamp());
            put_str(&mut buf, d.table_name())?;

            buf.put_u16_le(wire_len(d.primary_key_fields().len(), "field count")?);
            for field in d.primary_key_fields() {
                put_str(&mut buf, field.name())?;
                buf.put_u8(field.field_type() as u8);
                buf.put_u8(field.is_nullable() as u8);
            }

            buf.put_u32_le(wire_len(d.primary_key_values().len(), "row count")?);
            for row in d.primary_key_values() {
                buf.put_u16_le(wire_len(row.len(), "row arity")?);
                for value in row {
                    put_value(&mut buf, value)?;
                }
            }
        }
        StreamEvent::SchemaChange(s) => {
            buf.put_i64_le(s.timestamp());
            put_str(&mut buf, s.statement())?;
        }
        StreamEvent::Error(e) => {
            buf.put_i64_le(e.timestamp());
            put_str(&mut buf, e.message())?;
        }
        StreamEvent::PositionCheckpoint(c) => {
            put_str(&mut buf, c.transaction_id().as_str())?;
        }
    }

    Ok(buf.freeze())
}

/// 이벤트 디코딩
///
/// 남는 바이트가 있거나 행의 값 개수가 필드 개수와 다르면 실패합니다.
pub fn decode(data: &[u8]) -> Result<StreamEvent> {
    let mut cursor = Cursor::new(data);

    let tag = cursor.read_u8().map_err(|_| truncated("category"))?;
    let category = EventCategory::from_u8(tag)
        .ok_or_else(|| CdcError::Decode(format!("Unknown category tag: {}", tag)))?;

    let event = match category {
        EventCategory::DataChange => {
            let timestamp = read_i64(&mut cursor, "timestamp")?;
            let table = read_str(&mut cursor, "table name")?;

            let field_count = cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| truncated("field count"))? as usize;
            let mut fields = Vec::with_capacity(field_count);
            for _ in 0..field_count {
                let name = read_str(&mut cursor, "field name")?;
                let type_tag = cursor.read_u8().map_err(|_| truncated("field type"))?;
                let field_type = FieldType::from_u8(type_tag).ok_or_else(|| {
                    CdcError::Decode(format!("Unknown field type tag: {}", type_tag))
                })?;
                let nullable = match cursor.read_u8().map_err(|_| truncated("nullable flag"))? {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(CdcError::Decode(format!(
                            "Invalid nullable flag: {}",
                            other
                        )))
                    }
                };
                fields.push(if nullable {
                    FieldSchema::nullable(name, field_type)
                } else {
                    FieldSchema::new(name, field_type)
                });
            }

            let row_count = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| truncated("row count"))? as usize;
            let mut rows = Vec::with_capacity(row_count.min(1024));
            for row_index in 0..row_count {
                let arity = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| truncated("row arity"))? as usize;
                if arity != field_count {
                    return Err(CdcError::Decode(format!(
                        "Row {} has {} values but {} fields are declared",
                        row_index, arity, field_count
                    )));
                }
                let mut row = Vec::with_capacity(arity);
                for _ in 0..arity {
                    row.push(read_value(&mut cursor)?);
                }
                rows.push(row);
            }

            StreamEvent::data_change(table, fields, rows, timestamp).map_err(invalid)?
        }
        EventCategory::SchemaChange => {
            let timestamp = read_i64(&mut cursor, "timestamp")?;
            let statement = read_str(&mut cursor, "statement")?;
            StreamEvent::schema_change(statement, timestamp).map_err(invalid)?
        }
        EventCategory::Error => {
            let timestamp = read_i64(&mut cursor, "timestamp")?;
            let message = read_str(&mut cursor, "error text")?;
            StreamEvent::error(message, timestamp).map_err(invalid)?
        }
        EventCategory::PositionCheckpoint => {
            let id = read_str(&mut cursor, "transaction id")?;
            StreamEvent::checkpoint(id).map_err(invalid)?
        }
    };

    let consumed = cursor.position() as usize;
    if consumed != data.len() {
        return Err(CdcError::Decode(format!(
            "{} trailing bytes after {} event",
            data.len() - consumed,
            category
        )));
    }

    Ok(event)
}

/// 셀 값 인코딩 (행 식별자 생성에도 사용)
pub(crate) fn put_value(buf: &mut BytesMut, value: &TypedValue) -> Result<()> {
    match value {
        TypedValue::Null => buf.put_u8(VALUE_NULL),
        TypedValue::Integer(i) => {
            buf.put_u8(VALUE_INTEGER);
            buf.put_i64_le(*i);
        }
        TypedValue::Float(d) => {
            buf.put_u8(VALUE_FLOAT);
            buf.put_u64_le(d.to_bits());
        }
        TypedValue::String(s) => {
            buf.put_u8(VALUE_STRING);
            put_str(buf, s)?;
        }
        TypedValue::Binary(b) => {
            buf.put_u8(VALUE_BINARY);
            put_bytes(buf, b)?;
        }
    }
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<()> {
    put_bytes(buf, s.as_bytes())
}

fn put_bytes(buf: &mut BytesMut, b: &[u8]) -> Result<()> {
    buf.put_u32_le(wire_len(b.len(), "length")?);
    buf.put_slice(b);
    Ok(())
}

/// 헤더 폭에 맞는지 확인한 뒤 변환
fn wire_len<T: TryFrom<usize>>(len: usize, what: &str) -> Result<T> {
    T::try_from(len).map_err(|_| {
        CdcError::Encode(format!(
            "{} {} does not fit in a {}-byte header",
            what,
            len,
            std::mem::size_of::<T>()
        ))
    })
}

fn read_value(cursor: &mut Cursor<&[u8]>) -> Result<TypedValue> {
    let tag = cursor.read_u8().map_err(|_| truncated("value tag"))?;
    let value = match tag {
        VALUE_NULL => TypedValue::Null,
        VALUE_INTEGER => TypedValue::Integer(read_i64(cursor, "integer value")?),
        VALUE_FLOAT => {
            let bits = cursor
                .read_u64::<LittleEndian>()
                .map_err(|_| truncated("float value"))?;
            TypedValue::Float(f64::from_bits(bits))
        }
        VALUE_STRING => TypedValue::String(read_str(cursor, "string value")?),
        VALUE_BINARY => TypedValue::Binary(read_bytes(cursor, "binary value")?),
        other => return Err(CdcError::Decode(format!("Unknown value tag: {}", other))),
    };
    Ok(value)
}

fn read_i64(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<i64> {
    cursor
        .read_i64::<LittleEndian>()
        .map_err(|_| truncated(what))
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<Vec<u8>> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| truncated(what))? as usize;

    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(truncated(what));
    }

    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(|_| truncated(what))?;
    Ok(bytes)
}

fn read_str(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<String> {
    let bytes = read_bytes(cursor, what)?;
    String::from_utf8(bytes).map_err(|e| CdcError::Decode(format!("Invalid UTF-8 in {}: {}", what, e)))
}

fn truncated(what: &str) -> CdcError {
    CdcError::Decode(format!("Unexpected end of input while reading {}", what))
}

fn invalid(err: ValidationError) -> CdcError {
    CdcError::Decode(format!("Decoded event is invalid: {}", err))
}
