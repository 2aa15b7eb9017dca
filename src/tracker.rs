//! 위치 추적기
//!
//! "마지막으로 완전히 소비된 트랜잭션 경계"를 영구 저장합니다.
//! 스트림 시작 시 load, 소비자가 Ack한 뒤에만 advance 합니다.

use crate::error::{CdcError, Result};
use crate::position::{Position, TransactionId};
use crate::store::{PositionStore, StreamId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CAS 충돌 시 재시도 횟수
const MAX_CAS_ATTEMPTS: usize = 64;

/// advance 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// 커서가 앞으로 이동함
    Advanced,
    /// 이미 같거나 더 앞선 위치 (재전송 등)
    Unchanged,
}

/// 스트림 하나의 위치 추적기
#[derive(Clone)]
pub struct PositionTracker {
    stream: StreamId,
    store: Arc<dyn PositionStore>,
}

impl PositionTracker {
    pub fn new(stream: StreamId, store: Arc<dyn PositionStore>) -> Self {
        PositionTracker { stream, store }
    }

    pub fn stream(&self) -> &StreamId {
        &self.stream
    }

    /// 마지막으로 확인된 위치 조회
    ///
    /// 실패하면 진짜 커서를 알 수 없으므로 호출자는 스트림을 시작하면 안 됩니다.
    pub fn load(&self) -> Result<Position> {
        let record = self.store.read(&self.stream).map_err(as_storage_error)?;
        let position = Position::from(record.map(|r| r.transaction_id));
        debug!("Loaded position for {}: {}", self.stream, position);
        Ok(position)
    }

    /// 커서 전진
    ///
    /// 저장된 값보다 작거나 같은 ID는 에러 없이 무시합니다.
    /// 성공 반환 시점에는 이미 영구 저장되어 있습니다.
    pub fn advance(&self, id: &TransactionId) -> Result<AdvanceOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .read(&self.stream)
                .map_err(as_storage_error)?
                .map(|r| r.transaction_id);

            if let Some(ref current) = current {
                if id <= current {
                    debug!(
                        "Ignoring advance of {} to {} (stored {})",
                        self.stream, id, current
                    );
                    return Ok(AdvanceOutcome::Unchanged);
                }
            }

            if self
                .store
                .compare_and_set(&self.stream, current.as_ref(), id)
                .map_err(as_storage_error)?
            {
                debug!("Advanced {} to {}", self.stream, id);
                return Ok(AdvanceOutcome::Advanced);
            }
        }

        Err(CdcError::StorageUnavailable(format!(
            "cursor for {} kept changing during advance",
            self.stream
        )))
    }

    /// 운영자 개입으로 커서 재설정 (뒤로 되돌릴 수 있는 유일한 방법)
    pub fn reset(&self, position: &Position) -> Result<()> {
        warn!("Resetting position of {} to {}", self.stream, position);
        self.store
            .overwrite(&self.stream, position.transaction_id())
            .map_err(as_storage_error)?;
        info!("Position of {} reset to {}", self.stream, position);
        Ok(())
    }
}

fn as_storage_error(err: CdcError) -> CdcError {
    match err {
        CdcError::StorageUnavailable(_) => err,
        other => CdcError::StorageUnavailable(other.to_string()),
    }
}
