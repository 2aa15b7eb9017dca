//! 업데이트 스트림 (Change Data Capture) 핵심 구현
//!
//! 소스가 보내는 변경 이벤트를 트랜잭션 단위로 조립해 하위 소비자에게 전달하고,
//! 소비자가 확인한 위치를 영구 저장해 재시작 후 이어서 처리합니다.
//! 주요 기능:
//! - 이벤트 모델 및 바이너리 코덱
//! - 체크포인트 기반 트랜잭션 조립
//! - 스트림별 위치 추적 및 저장

pub mod assembler;
pub mod codec;
pub mod consumer;
pub mod error;
pub mod events;
pub mod position;
pub mod protocol;
pub mod source;
pub mod store;
pub mod stream_engine;
pub mod tracker;
pub mod value;

pub use assembler::{Assembled, FailedTransaction, OrderingAnomaly, Transaction, TransactionAssembler};
pub use consumer::{ErrorAction, StreamConsumer, TransactionOutcome};
pub use error::{CdcError, ErrorCode, Result, ValidationError};
pub use events::{EventCategory, StreamEvent};
pub use position::{Position, TransactionId};
pub use source::EventSource;
pub use store::{FilePositionStore, MemoryPositionStore, PositionStore, StreamId};
pub use stream_engine::{StreamConfig, StreamEngine};
pub use tracker::PositionTracker;
pub use value::{FieldSchema, FieldType, TypedValue};
