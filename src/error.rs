//! 업데이트 스트림 관련 에러 타입

use crate::events::EventCategory;
use std::io;
use thiserror::Error;

/// 이벤트 생성/디코딩 시점의 유효성 검사 실패
///
/// 행/컬럼 인덱스는 모두 0부터 시작합니다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("테이블명이 비어 있습니다")]
    EmptyTableName,

    #[error("기본키 필드 목록이 비어 있습니다")]
    NoPrimaryKeyFields,

    #[error("기본키 행이 비어 있습니다")]
    NoPrimaryKeyRows,

    #[error("필드가 {count}개로 최대 {max}개를 넘습니다")]
    TooManyFields { count: usize, max: usize },

    #[error("필드 {index}의 이름이 비어 있습니다")]
    EmptyFieldName { index: usize },

    #[error("행 {row}: 값 {actual}개, 필드 {expected}개")]
    ArityMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("행 {row} 컬럼 {column}: {expected} 타입이 필요하지만 {actual} 값입니다")]
    TypeMismatch {
        row: usize,
        column: usize,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("행 {row} 컬럼 {column}: NULL을 허용하지 않는 필드입니다")]
    UnexpectedNull { row: usize, column: usize },

    #[error("DDL 문이 비어 있습니다")]
    EmptyStatement,

    #[error("에러 메시지가 비어 있습니다")]
    EmptyErrorText,

    #[error("트랜잭션 ID가 비어 있습니다")]
    EmptyTransactionId,
}

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("유효하지 않은 이벤트: {0}")]
    Validation(#[from] ValidationError),

    #[error("이벤트 디코딩 에러: {0}")]
    Decode(String),

    #[error("이벤트 인코딩 에러: {0}")]
    Encode(String),

    #[error("{actual} 이벤트에는 {field} 필드가 없습니다 ({expected} 전용)")]
    WrongCategory {
        field: &'static str,
        expected: &'static str,
        actual: EventCategory,
    },

    #[error("체크포인트 저장소를 사용할 수 없습니다: {0}")]
    StorageUnavailable(String),

    #[error("전송 에러: {0}")]
    Transport(String),

    #[error("유효하지 않은 스트림 ID: {0}")]
    InvalidStreamId(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("채널이 닫혔습니다")]
    ChannelClosed,
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

impl CdcError {
    /// 업스트림 RPC 에러 코드 체계로 분류
    pub fn code(&self) -> ErrorCode {
        match self {
            CdcError::Validation(_)
            | CdcError::Decode(_)
            | CdcError::Encode(_)
            | CdcError::InvalidStreamId(_) => {
                ErrorCode::BadInput
            }
            CdcError::WrongCategory { .. } => ErrorCode::InternalError,
            CdcError::StorageUnavailable(_) => ErrorCode::ResourceTemporarilyUnavailable,
            CdcError::Transport(_) | CdcError::ChannelClosed => ErrorCode::QueryNotServed,
            CdcError::IoError(_) => ErrorCode::UnknownError,
            CdcError::SerializationError(_) => ErrorCode::InternalError,
        }
    }
}

/// 업스트림 RPC 에러 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    Cancelled = 1,
    UnknownError = 2,
    BadInput = 3,
    DeadlineExceeded = 4,
    IntegrityError = 5,
    PermissionDenied = 6,
    ThrottledError = 7,
    QueryNotServed = 8,
    NotInTx = 9,
    InternalError = 10,
    ResourceTemporarilyUnavailable = 11,
}

impl ErrorCode {
    pub fn from_u8(val: u8) -> Option<Self> {
        let code = match val {
            0 => ErrorCode::Success,
            1 => ErrorCode::Cancelled,
            2 => ErrorCode::UnknownError,
            3 => ErrorCode::BadInput,
            4 => ErrorCode::DeadlineExceeded,
            5 => ErrorCode::IntegrityError,
            6 => ErrorCode::PermissionDenied,
            7 => ErrorCode::ThrottledError,
            8 => ErrorCode::QueryNotServed,
            9 => ErrorCode::NotInTx,
            10 => ErrorCode::InternalError,
            11 => ErrorCode::ResourceTemporarilyUnavailable,
            _ => return None,
        };
        Some(code)
    }

    /// 같은 요청을 다시 보내면 성공할 수 있는 코드인지 여부
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::DeadlineExceeded
                | ErrorCode::ThrottledError
                | ErrorCode::QueryNotServed
                | ErrorCode::ResourceTemporarilyUnavailable
        )
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_classification() {
        let err = CdcError::StorageUnavailable("disk gone".to_string());
        assert_eq!(err.code(), ErrorCode::ResourceTemporarilyUnavailable);
        assert!(err.code().is_retryable());

        let err: CdcError = ValidationError::EmptyTableName.into();
        assert_eq!(err.code(), ErrorCode::BadInput);
        assert!(!err.code().is_retryable());
    }

    #[test]
    fn test_error_code_from_u8() {
        assert_eq!(ErrorCode::from_u8(11), Some(ErrorCode::ResourceTemporarilyUnavailable));
        assert_eq!(ErrorCode::from_u8(12), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let err: CdcError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, CdcError::IoError(msg) if msg.contains("boom")));
    }
}
