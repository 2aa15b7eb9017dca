//! 업데이트 스트림 이벤트 타입 정의
//!
//! 하나의 StreamEvent는 아래 네 가지 카테고리 중 정확히 하나입니다.
//! - DML: 테이블명 + 기본키 필드 정의 + 기본키 행들
//! - DDL: 스키마 변경 문
//! - ERR: 소스 스트림의 복구 불가능한 에러
//! - POS: 트랜잭션 경계 (체크포인트)

use crate::codec;
use crate::error::{CdcError, Result, ValidationError};
use crate::position::TransactionId;
use crate::value::{FieldSchema, TypedValue};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// 이벤트 카테고리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EventCategory {
    /// 행 데이터 변경 (DML)
    DataChange = 1,
    /// 스키마 변경 (DDL)
    SchemaChange = 2,
    /// 소스 에러
    Error = 3,
    /// 트랜잭션 경계
    PositionCheckpoint = 4,
}

impl EventCategory {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(EventCategory::DataChange),
            2 => Some(EventCategory::SchemaChange),
            3 => Some(EventCategory::Error),
            4 => Some(EventCategory::PositionCheckpoint),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::DataChange => "DML",
            EventCategory::SchemaChange => "DDL",
            EventCategory::Error => "ERR",
            EventCategory::PositionCheckpoint => "POS",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DML" => Ok(EventCategory::DataChange),
            "DDL" => Ok(EventCategory::SchemaChange),
            "ERR" => Ok(EventCategory::Error),
            "POS" => Ok(EventCategory::PositionCheckpoint),
            other => Err(CdcError::Decode(format!("Unknown event category: {}", other))),
        }
    }
}

/// DML 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataChange {
    table_name: String,
    primary_key_fields: Vec<FieldSchema>,
    primary_key_values: Vec<Vec<TypedValue>>,
    timestamp: i64,
}

impl DataChange {
    pub fn new(
        table_name: impl Into<String>,
        primary_key_fields: Vec<FieldSchema>,
        primary_key_values: Vec<Vec<TypedValue>>,
        timestamp: i64,
    ) -> std::result::Result<Self, ValidationError> {
        let table_name = table_name.into();
        if table_name.is_empty() {
            return Err(ValidationError::EmptyTableName);
        }
        if primary_key_fields.is_empty() {
            return Err(ValidationError::NoPrimaryKeyFields);
        }
        if primary_key_fields.len() > codec::MAX_FIELDS {
            return Err(ValidationError::TooManyFields {
                count: primary_key_fields.len(),
                max: codec::MAX_FIELDS,
            });
        }
        if let Some(index) = primary_key_fields.iter().position(|f| f.name().is_empty()) {
            return Err(ValidationError::EmptyFieldName { index });
        }
        if primary_key_values.is_empty() {
            return Err(ValidationError::NoPrimaryKeyRows);
        }

        for (row, values) in primary_key_values.iter().enumerate() {
            if values.len() != primary_key_fields.len() {
                return Err(ValidationError::ArityMismatch {
                    row,
                    expected: primary_key_fields.len(),
                    actual: values.len(),
                });
            }
            for (column, (field, value)) in primary_key_fields.iter().zip(values).enumerate() {
                if field.accepts(value) {
                    continue;
                }
                if value.is_null() {
                    return Err(ValidationError::UnexpectedNull { row, column });
                }
                return Err(ValidationError::TypeMismatch {
                    row,
                    column,
                    expected: field.field_type().as_str(),
                    actual: value.type_name(),
                });
            }
        }

        Ok(DataChange {
            table_name,
            primary_key_fields,
            primary_key_values,
            timestamp,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn primary_key_fields(&self) -> &[FieldSchema] {
        &self.primary_key_fields
    }

    /// 기본키 행들 (수신 순서 유지)
    pub fn primary_key_values(&self) -> &[Vec<TypedValue>] {
        &self.primary_key_values
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// 행마다 (테이블, 기본키) 식별자 생성
    ///
    /// 재전송된 트랜잭션을 멱등하게 적용할 때 키로 사용합니다.
    pub fn row_keys(&self) -> Result<Vec<RowKey>> {
        self.primary_key_values
            .iter()
            .map(|row| {
                let mut buf = BytesMut::new();
                for value in row {
                    codec::put_value(&mut buf, value)?;
                }
                Ok(RowKey {
                    table: self.table_name.clone(),
                    key: buf.to_vec(),
                })
            })
            .collect()
    }
}

/// 멱등 적용용 행 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey {
    pub table: String,
    /// 기본키 튜플의 정규 인코딩
    pub key: Vec<u8>,
}

/// DDL 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaChange {
    statement: String,
    timestamp: i64,
}

impl SchemaChange {
    pub fn new(
        statement: impl Into<String>,
        timestamp: i64,
    ) -> std::result::Result<Self, ValidationError> {
        let statement = statement.into();
        if statement.is_empty() {
            return Err(ValidationError::EmptyStatement);
        }
        Ok(SchemaChange {
            statement,
            timestamp,
        })
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// ERR 이벤트 데이터 (소스 에러)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    message: String,
    timestamp: i64,
}

impl SourceError {
    pub fn new(
        message: impl Into<String>,
        timestamp: i64,
    ) -> std::result::Result<Self, ValidationError> {
        let message = message.into();
        if message.is_empty() {
            return Err(ValidationError::EmptyErrorText);
        }
        Ok(SourceError { message, timestamp })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (ts={})", self.message, self.timestamp)
    }
}

/// POS 이벤트 데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    transaction_id: TransactionId,
}

impl Checkpoint {
    pub fn new(transaction_id: TransactionId) -> Self {
        Checkpoint { transaction_id }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }
}

/// 업데이트 스트림의 단일 이벤트
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category")]
pub enum StreamEvent {
    #[serde(rename = "DML")]
    DataChange(DataChange),
    #[serde(rename = "DDL")]
    SchemaChange(SchemaChange),
    #[serde(rename = "ERR")]
    Error(SourceError),
    #[serde(rename = "POS")]
    PositionCheckpoint(Checkpoint),
}

impl StreamEvent {
    /// DML 이벤트 생성
    pub fn data_change(
        table_name: impl Into<String>,
        primary_key_fields: Vec<FieldSchema>,
        primary_key_values: Vec<Vec<TypedValue>>,
        timestamp: i64,
    ) -> std::result::Result<Self, ValidationError> {
        DataChange::new(table_name, primary_key_fields, primary_key_values, timestamp)
            .map(StreamEvent::DataChange)
    }

    /// DDL 이벤트 생성
    pub fn schema_change(
        statement: impl Into<String>,
        timestamp: i64,
    ) -> std::result::Result<Self, ValidationError> {
        SchemaChange::new(statement, timestamp).map(StreamEvent::SchemaChange)
    }

    /// ERR 이벤트 생성
    pub fn error(
        message: impl Into<String>,
        timestamp: i64,
    ) -> std::result::Result<Self, ValidationError> {
        SourceError::new(message, timestamp).map(StreamEvent::Error)
    }

    /// POS 이벤트 생성
    pub fn checkpoint(
        transaction_id: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        TransactionId::new(transaction_id)
            .map(|id| StreamEvent::PositionCheckpoint(Checkpoint::new(id)))
    }

    pub fn category(&self) -> EventCategory {
        match self {
            StreamEvent::DataChange(_) => EventCategory::DataChange,
            StreamEvent::SchemaChange(_) => EventCategory::SchemaChange,
            StreamEvent::Error(_) => EventCategory::Error,
            StreamEvent::PositionCheckpoint(_) => EventCategory::PositionCheckpoint,
        }
    }

    /// 소스 측 이벤트 시각 (초 단위, POS에는 없음)
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            StreamEvent::DataChange(d) => Some(d.timestamp()),
            StreamEvent::SchemaChange(s) => Some(s.timestamp()),
            StreamEvent::Error(e) => Some(e.timestamp()),
            StreamEvent::PositionCheckpoint(_) => None,
        }
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp()
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(self, StreamEvent::PositionCheckpoint(_))
    }

    pub fn as_data_change(&self) -> Result<&DataChange> {
        match self {
            StreamEvent::DataChange(d) => Ok(d),
            _ => Err(self.wrong_category("primary_key", EventCategory::DataChange)),
        }
    }

    pub fn table_name(&self) -> Result<&str> {
        match self {
            StreamEvent::DataChange(d) => Ok(d.table_name()),
            _ => Err(self.wrong_category("table_name", EventCategory::DataChange)),
        }
    }

    pub fn primary_key_fields(&self) -> Result<&[FieldSchema]> {
        match self {
            StreamEvent::DataChange(d) => Ok(d.primary_key_fields()),
            _ => Err(self.wrong_category("primary_key_fields", EventCategory::DataChange)),
        }
    }

    pub fn primary_key_values(&self) -> Result<&[Vec<TypedValue>]> {
        match self {
            StreamEvent::DataChange(d) => Ok(d.primary_key_values()),
            _ => Err(self.wrong_category("primary_key_values", EventCategory::DataChange)),
        }
    }

    pub fn statement(&self) -> Result<&str> {
        match self {
            StreamEvent::SchemaChange(s) => Ok(s.statement()),
            _ => Err(self.wrong_category("statement", EventCategory::SchemaChange)),
        }
    }

    pub fn error_text(&self) -> Result<&str> {
        match self {
            StreamEvent::Error(e) => Ok(e.message()),
            _ => Err(self.wrong_category("error_text", EventCategory::Error)),
        }
    }

    pub fn transaction_id(&self) -> Result<&TransactionId> {
        match self {
            StreamEvent::PositionCheckpoint(c) => Ok(c.transaction_id()),
            _ => Err(self.wrong_category(
                "transaction_id",
                EventCategory::PositionCheckpoint,
            )),
        }
    }

    fn wrong_category(&self, field: &'static str, expected: EventCategory) -> CdcError {
        CdcError::WrongCategory {
            field,
            expected: expected.as_str(),
            actual: self.category(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldType;

    fn pk_int() -> Vec<FieldSchema> {
        vec![FieldSchema::new("pk", FieldType::Integer)]
    }

    #[test]
    fn test_data_change_valid() {
        let fields = vec![
            FieldSchema::new("id", FieldType::Integer),
            FieldSchema::new("region", FieldType::String),
        ];
        let rows = vec![
            vec![TypedValue::Integer(1), TypedValue::from("eu")],
            vec![TypedValue::Integer(2), TypedValue::from("us")],
        ];
        let event = StreamEvent::data_change("orders", fields, rows, 1_700_000_000).unwrap();

        assert_eq!(event.category(), EventCategory::DataChange);
        assert_eq!(event.table_name().unwrap(), "orders");
        assert_eq!(event.primary_key_values().unwrap().len(), 2);
        assert_eq!(event.primary_key_values().unwrap()[1][1], TypedValue::from("us"));
    }

    #[test]
    fn test_data_change_arity_mismatch() {
        let rows = vec![
            vec![TypedValue::Integer(1)],
            vec![TypedValue::Integer(2), TypedValue::Integer(3)],
        ];
        let err = StreamEvent::data_change("t", pk_int(), rows, 0).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ArityMismatch {
                row: 1,
                expected: 1,
                actual: 2
            }
        );
    }

    #[test]
    fn test_data_change_type_mismatch() {
        let fields = vec![
            FieldSchema::new("a", FieldType::Integer),
            FieldSchema::new("b", FieldType::Binary),
        ];
        let rows = vec![vec![TypedValue::Integer(1), TypedValue::from("oops")]];
        let err = StreamEvent::data_change("t", fields, rows, 0).unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                row: 0,
                column: 1,
                expected: "BINARY",
                actual: "STRING"
            }
        );
    }

    #[test]
    fn test_data_change_null_handling() {
        let rows = vec![vec![TypedValue::Null]];
        let err = StreamEvent::data_change("t", pk_int(), rows.clone(), 0).unwrap_err();
        assert_eq!(err, ValidationError::UnexpectedNull { row: 0, column: 0 });

        let fields = vec![FieldSchema::nullable("pk", FieldType::Integer)];
        assert!(StreamEvent::data_change("t", fields, rows, 0).is_ok());
    }

    #[test]
    fn test_data_change_requires_payload() {
        assert_eq!(
            StreamEvent::data_change("", pk_int(), vec![vec![TypedValue::Integer(1)]], 0),
            Err(ValidationError::EmptyTableName)
        );
        assert_eq!(
            StreamEvent::data_change("t", vec![], vec![vec![]], 0),
            Err(ValidationError::NoPrimaryKeyFields)
        );
        assert_eq!(
            StreamEvent::data_change("t", pk_int(), vec![], 0),
            Err(ValidationError::NoPrimaryKeyRows)
        );
        assert_eq!(
            StreamEvent::data_change(
                "t",
                vec![FieldSchema::new("", FieldType::Integer)],
                vec![vec![TypedValue::Integer(1)]],
                0
            ),
            Err(ValidationError::EmptyFieldName { index: 0 })
        );
    }

    #[test]
    fn test_other_categories_require_text() {
        assert_eq!(
            StreamEvent::schema_change("", 0),
            Err(ValidationError::EmptyStatement)
        );
        assert_eq!(StreamEvent::error("", 0), Err(ValidationError::EmptyErrorText));
        assert_eq!(
            StreamEvent::checkpoint(""),
            Err(ValidationError::EmptyTransactionId)
        );
    }

    #[test]
    fn test_wrong_category_access() {
        let ddl = StreamEvent::schema_change("ALTER TABLE t ADD c int", 10).unwrap();
        assert_eq!(ddl.statement().unwrap(), "ALTER TABLE t ADD c int");
        assert!(matches!(
            ddl.table_name(),
            Err(CdcError::WrongCategory {
                actual: EventCategory::SchemaChange,
                ..
            })
        ));

        let pos = StreamEvent::checkpoint("txn-1").unwrap();
        assert_eq!(pos.timestamp(), None);
        assert!(pos.error_text().is_err());
        assert_eq!(pos.transaction_id().unwrap().as_str(), "txn-1");
    }

    #[test]
    fn test_timestamp_utc() {
        let err = StreamEvent::error("relay log corrupted", 1_700_000_000).unwrap();
        let ts = err.timestamp_utc().unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_too_many_fields_rejected() {
        let count = codec::MAX_FIELDS + 2;
        let fields: Vec<_> = (0..count)
            .map(|i| FieldSchema::new(format!("c{}", i), FieldType::Integer))
            .collect();
        let row: Vec<_> = (0..count as i64).map(TypedValue::Integer).collect();

        assert_eq!(
            StreamEvent::data_change("wide", fields, vec![row], 0),
            Err(ValidationError::TooManyFields {
                count: 65_537,
                max: 65_535
            })
        );
    }

    #[test]
    fn test_row_keys_distinguish_rows() {
        let rows = vec![
            vec![TypedValue::Integer(5)],
            vec![TypedValue::Integer(6)],
            vec![TypedValue::Integer(5)],
        ];
        let event = StreamEvent::data_change("t", pk_int(), rows, 0).unwrap();
        let keys = event.as_data_change().unwrap().row_keys().unwrap();
        assert_eq!(keys.len(), 3);
        assert_ne!(keys[0], keys[1]);
        assert_eq!(keys[0], keys[2]);
    }

    #[test]
    fn test_category_names() {
        assert_eq!("POS".parse::<EventCategory>().unwrap(), EventCategory::PositionCheckpoint);
        assert_eq!(EventCategory::DataChange.to_string(), "DML");
        assert!("XYZ".parse::<EventCategory>().is_err());
    }

    #[test]
    fn test_serialize_json_tagged() {
        let event = StreamEvent::checkpoint("txn-3").unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "POS");
        assert_eq!(json["transaction_id"], "txn-3");
    }
}
