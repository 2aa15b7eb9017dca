//! 기본키 컬럼 정의(FieldSchema)와 타입이 지정된 셀 값(TypedValue)

use serde::Serialize;
use std::fmt;

/// 컬럼 선언 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum FieldType {
    Integer = 1,
    Float = 2,
    String = 3,
    Binary = 4,
}

impl FieldType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(FieldType::Integer),
            2 => Some(FieldType::Float),
            3 => Some(FieldType::String),
            4 => Some(FieldType::Binary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::String => "STRING",
            FieldType::Binary => "BINARY",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 기본키 컬럼 정의
///
/// 이벤트에 붙은 뒤에는 변경되지 않습니다. 이름이 비어 있는지는
/// 이벤트 생성 시점에 검사합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldSchema {
    name: String,
    field_type: FieldType,
    nullable: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSchema {
            name: name.into(),
            field_type,
            nullable: false,
        }
    }

    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSchema {
            name: name.into(),
            field_type,
            nullable: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// 값이 이 필드에 들어갈 수 있는지 확인
    pub fn accepts(&self, value: &TypedValue) -> bool {
        match value.field_type() {
            Some(t) => t == self.field_type,
            None => self.nullable,
        }
    }
}

/// 셀 값
///
/// 실수는 비트 단위로 비교합니다. NaN도 자기 자신과 같고, 0.0과 -0.0은 다릅니다.
/// 와이어 인코딩과 같은 기준입니다.
#[derive(Debug, Clone, Serialize)]
pub enum TypedValue {
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypedValue::Null, TypedValue::Null) => true,
            (TypedValue::Integer(a), TypedValue::Integer(b)) => a == b,
            (TypedValue::Float(a), TypedValue::Float(b)) => a.to_bits() == b.to_bits(),
            (TypedValue::String(a), TypedValue::String(b)) => a == b,
            (TypedValue::Binary(a), TypedValue::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypedValue {}

impl TypedValue {
    /// 값의 타입 태그 (NULL이면 None)
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            TypedValue::Null => None,
            TypedValue::Integer(_) => Some(FieldType::Integer),
            TypedValue::Float(_) => Some(FieldType::Float),
            TypedValue::String(_) => Some(FieldType::String),
            TypedValue::Binary(_) => Some(FieldType::Binary),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.field_type().map(|t| t.as_str()).unwrap_or("NULL")
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => f.write_str("NULL"),
            TypedValue::Integer(i) => write!(f, "{}", i),
            TypedValue::Float(d) => write!(f, "{}", d),
            TypedValue::String(s) => write!(f, "'{}'", s),
            TypedValue::Binary(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Integer(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        TypedValue::Float(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::String(v.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        TypedValue::String(v)
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(v: Vec<u8>) -> Self {
        TypedValue::Binary(v)
    }
}
