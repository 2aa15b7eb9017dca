//! 스트림 재시작 위치 (트랜잭션 ID 및 Position)
//!
//! 트랜잭션 ID는 소스 시스템이 주는 불투명한 토큰입니다.
//! 예: "txn-42", "mysql-bin.000003:4097", "uuid:1-100"
//! 숫자가 아닐 수 있으므로 자연 순서(natural order)로 비교합니다.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 비어 있지 않은 트랜잭션 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> std::result::Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::EmptyTransactionId);
        }
        Ok(TransactionId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TransactionId {
    type Error = ValidationError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        TransactionId::new(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for TransactionId {
    fn cmp(&self, other: &Self) -> Ordering {
        // "txn-01"과 "txn-1"처럼 자연 순서가 같으면 원문으로 비교해 Eq와 일치시킴
        natural_cmp(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TransactionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 숫자 구간은 수치로, 나머지는 바이트 단위로 비교
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (is_digits(l), is_digits(r)) {
                    (true, true) => cmp_numeric(l, r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn is_digits(s: &str) -> bool {
    s.as_bytes().first().map_or(false, |b| b.is_ascii_digit())
}

/// 임의 길이 숫자 문자열 비교 (오버플로 없음)
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// 숫자/비숫자 구간으로 문자열 분할
struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Chunks { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = *self.rest.as_bytes().first()?;
        let digit = first.is_ascii_digit();
        let end = self
            .rest
            .bytes()
            .position(|b| b.is_ascii_digit() != digit)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}

/// 스트림 재시작 위치
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    /// 아직 확인된 트랜잭션 없음
    StartOfStream,
    /// 마지막으로 확인(Ack)된 트랜잭션 경계
    At(TransactionId),
}

impl Position {
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            Position::StartOfStream => None,
            Position::At(id) => Some(id),
        }
    }

    /// 주어진 트랜잭션이 이미 이 위치까지 확인되었는지 여부
    pub fn covers(&self, id: &TransactionId) -> bool {
        match self {
            Position::StartOfStream => false,
            Position::At(current) => id <= current,
        }
    }
}

impl From<Option<TransactionId>> for Position {
    fn from(id: Option<TransactionId>) -> Self {
        match id {
            Some(id) => Position::At(id),
            None => Position::StartOfStream,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::StartOfStream => f.write_str("<start of stream>"),
            Position::At(id) => write!(f, "{}", id),
        }
    }
}

/// 스트림 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingState {
    /// 시작 전
    Idle,
    /// 스트리밍 처리 중
    Streaming,
    /// 중단됨
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TransactionId {
        TransactionId::new(s).unwrap()
    }

    #[test]
    fn test_empty_id_rejected() {
        assert_eq!(
            TransactionId::new(""),
            Err(ValidationError::EmptyTransactionId)
        );
    }

    #[test]
    fn test_natural_order() {
        assert!(id("txn-2") < id("txn-10"));
        assert!(id("txn-9") < id("txn-10"));
        assert!(id("mysql-bin.000003:4") < id("mysql-bin.000003:120"));
        assert!(id("mysql-bin.000003:99999") < id("mysql-bin.000004:4"));
        assert!(id("a") < id("b"));
        assert!(id("txn") < id("txn-1"));
    }

    #[test]
    fn test_order_consistent_with_eq() {
        let a = id("txn-01");
        let b = id("txn-1");
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert_eq!(id("txn-1").cmp(&id("txn-1")), Ordering::Equal);
    }

    #[test]
    fn test_large_numeric_chunks() {
        assert!(id("99999999999999999999999") < id("100000000000000000000000"));
    }

    #[test]
    fn test_position_covers() {
        let pos = Position::At(id("txn-5"));
        assert!(pos.covers(&id("txn-5")));
        assert!(pos.covers(&id("txn-4")));
        assert!(!pos.covers(&id("txn-6")));
        assert!(!Position::StartOfStream.covers(&id("txn-1")));
    }

    #[test]
    fn test_transaction_id_serde() {
        let json = serde_json::to_string(&id("txn-7")).unwrap();
        assert_eq!(json, "\"txn-7\"");
        let back: TransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id("txn-7"));
        assert!(serde_json::from_str::<TransactionId>("\"\"").is_err());
    }
}
