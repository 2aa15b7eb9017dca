//! 스트림 소비자 계약
//!
//! 조립된 트랜잭션은 소스 순서대로 한 번씩 전달됩니다. 다만 재연결 후에는
//! 이미 적용한 트랜잭션이 다시 올 수 있으므로 소비자는 (테이블, 기본키) 또는
//! 트랜잭션 ID 기준으로 멱등하게 적용해야 합니다.

use crate::assembler::{FailedTransaction, OrderingAnomaly, Transaction};
use std::future::Future;

/// 트랜잭션 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// 적용 완료, 커서 전진
    Ack,
    /// 같은 트랜잭션을 다시 전달
    Retry,
    /// 스트림을 영구 중단
    Abort,
}

/// 에러/이상 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    /// 이벤트 수신 중단
    Halt,
}

/// 하위 소비자가 구현하는 콜백 집합
pub trait StreamConsumer: Send {
    fn on_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> impl Future<Output = TransactionOutcome> + Send;

    fn on_error(&mut self, failure: &FailedTransaction) -> impl Future<Output = ErrorAction> + Send;

    /// 체크포인트 순서 이상 (기본: 계속 진행)
    fn on_anomaly(
        &mut self,
        _anomaly: &OrderingAnomaly,
    ) -> impl Future<Output = ErrorAction> + Send {
        async { ErrorAction::Continue }
    }
}
