//! 업데이트 스트림 엔진 - 조립 및 전달 파이프라인
//!
//! 엔진은 다음 순서로 진행됩니다:
//! 1. 저장된 위치 로드 (실패 시 시작하지 않음)
//! 2. 소스에서 이벤트를 하나씩 읽어 트랜잭션으로 조립
//! 3. 소비자에게 전달, Ack 이후에만 위치 전진
//!
//! 스트림 하나는 단일 파이프라인으로만 처리합니다. 중단 요청은 트랜잭션
//! 경계(조립 버퍼가 비어 있을 때)에서만 반영됩니다.

use crate::assembler::{Assembled, Transaction, TransactionAssembler};
use crate::consumer::{ErrorAction, StreamConsumer, TransactionOutcome};
use crate::error::{CdcError, Result};
use crate::position::{Position, ProcessingState, TransactionId};
use crate::source::{is_transport_failure, EventSource};
use crate::store::{PositionStore, StreamId};
use crate::tracker::{AdvanceOutcome, PositionTracker};
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// 스트림 엔진 설정
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// 커서 레코드를 구분하는 스트림(샤드) ID
    pub stream_id: StreamId,
    /// 재시작 시 이미 확인된 트랜잭션을 소비자에게 다시 보내지 않음
    pub skip_acknowledged: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            stream_id: StreamId::default(),
            skip_acknowledged: false,
        }
    }
}

impl StreamConfig {
    pub fn new(stream_id: StreamId) -> Self {
        StreamConfig {
            stream_id,
            ..Default::default()
        }
    }

    /// 환경 변수에서 설정 읽기
    ///
    /// - `STREAM_ID` (기본값 "default")
    /// - `SKIP_ACKNOWLEDGED` ("1" 또는 "true")
    pub fn from_env() -> Result<Self> {
        let mut config = StreamConfig::default();
        if let Ok(id) = env::var("STREAM_ID") {
            config.stream_id = StreamId::new(id)?;
        }
        if let Ok(flag) = env::var("SKIP_ACKNOWLEDGED") {
            config.skip_acknowledged = parse_flag(&flag);
        }
        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// 실행 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub events_received: u64,
    pub transactions_committed: u64,
    /// Ack 되었지만 이미 저장된 위치 이하였던 트랜잭션 (재전송)
    pub transactions_replayed: u64,
    pub transactions_skipped: u64,
    pub retries: u64,
    pub failed_transactions: u64,
    pub anomalies: u64,
}

/// 실행 종료 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// 소스가 끝남
    SourceExhausted,
    /// 중단 요청
    Stopped,
    /// 소비자가 on_error/on_anomaly에서 Halt 반환
    Halted,
    /// 소비자가 해당 트랜잭션에서 Abort 반환
    Aborted(TransactionId),
    /// 전송 계층 실패 (재연결 후 다시 run 호출)
    TransportFailed(String),
}

/// 실행 결과 요약
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stream: StreamId,
    pub resumed_from: Position,
    /// 마지막으로 확인된 위치
    pub position: Position,
    pub reason: StopReason,
    pub stats: StreamStats,
}

/// 트랜잭션 경계에서 스트림을 멈추는 핸들
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

enum Delivery {
    Acked,
    Aborted,
    Stopped,
}

/// 업데이트 스트림 엔진
pub struct StreamEngine {
    config: StreamConfig,
    tracker: PositionTracker,
    state: ProcessingState,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl StreamEngine {
    /// 새 엔진 생성
    pub fn new(config: StreamConfig, store: Arc<dyn PositionStore>) -> Self {
        let tracker = PositionTracker::new(config.stream_id.clone(), store);
        let (stop_tx, stop_rx) = watch::channel(false);
        StreamEngine {
            config,
            tracker,
            state: ProcessingState::Idle,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// 상태 조회
    pub fn state(&self) -> ProcessingState {
        self.state
    }

    /// 저장된 위치 조회 (소스 재연결 지점 결정용)
    pub async fn resume_position(&self) -> Result<Position> {
        let tracker = self.tracker.clone();
        run_blocking(move || tracker.load()).await
    }

    /// 스트림 처리
    ///
    /// 저장소 장애(StorageUnavailable)만 `Err`로 반환합니다. 나머지 종료 사유는
    /// `RunSummary::reason`에 담깁니다. 전송 실패나 중단 후에는 같은 엔진으로
    /// 다시 호출하면 마지막 Ack 위치부터 이어집니다. 중단 요청은 그 요청으로
    /// 끝난 run에서 소비되므로 다음 run에는 남지 않습니다.
    pub async fn run<S, C>(&mut self, source: &mut S, consumer: &mut C) -> Result<RunSummary>
    where
        S: EventSource,
        C: StreamConsumer,
    {
        let result = self.run_inner(source, consumer).await;
        self.state = ProcessingState::Stopped;

        // 처리된 중단 요청은 소비함 (다음 run은 새로 시작)
        if matches!(&result, Ok(summary) if summary.reason == StopReason::Stopped) {
            self.stop_tx.send_replace(false);
        }

        match &result {
            Ok(summary) => info!(
                "Stream {} stopped ({:?}) at {}",
                summary.stream, summary.reason, summary.position
            ),
            Err(e) => error!("Stream {} failed: {}", self.config.stream_id, e),
        }
        result
    }

    async fn run_inner<S, C>(&mut self, source: &mut S, consumer: &mut C) -> Result<RunSummary>
    where
        S: EventSource,
        C: StreamConsumer,
    {
        let resumed_from = self.resume_position().await?;
        info!(
            "Starting stream {} from {}",
            self.config.stream_id, resumed_from
        );

        self.state = ProcessingState::Streaming;
        let mut assembler = TransactionAssembler::new();
        let mut stats = StreamStats::default();
        let mut position = resumed_from.clone();
        let mut stop_rx = self.stop_rx.clone();

        let reason = loop {
            let next = if assembler.is_at_boundary() {
                if stop_requested(&stop_rx) {
                    break StopReason::Stopped;
                }
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => continue,
                    next = source.next_event() => next,
                }
            } else {
                source.next_event().await
            };

            let Some(decoded) = next else {
                let dropped = assembler.discard();
                if !dropped.is_empty() {
                    warn!(
                        "Source ended with {} events of an unfinished transaction",
                        dropped.len()
                    );
                }
                break StopReason::SourceExhausted;
            };

            if let Err(ref e) = decoded {
                if is_transport_failure(e) {
                    let dropped = assembler.discard();
                    warn!(
                        "Transport failure, discarding {} buffered events: {}",
                        dropped.len(),
                        e
                    );
                    break StopReason::TransportFailed(e.to_string());
                }
            }

            stats.events_received += 1;

            match assembler.push_decoded(decoded) {
                None => {}
                Some(Assembled::Failed(failed)) => {
                    stats.failed_transactions += 1;
                    if consumer.on_error(&failed).await == ErrorAction::Halt {
                        info!("Consumer halted stream after: {}", failed.cause);
                        break StopReason::Halted;
                    }
                }
                Some(Assembled::Committed(txn)) => {
                    if let Some(anomaly) = txn.anomaly() {
                        stats.anomalies += 1;
                        if consumer.on_anomaly(anomaly).await == ErrorAction::Halt {
                            info!("Consumer halted stream on anomaly: {}", anomaly);
                            break StopReason::Halted;
                        }
                    }

                    if self.config.skip_acknowledged && resumed_from.covers(txn.transaction_id())
                    {
                        debug!(
                            "Skipping already acknowledged transaction {}",
                            txn.transaction_id()
                        );
                        stats.transactions_skipped += 1;
                        continue;
                    }

                    match self
                        .deliver(&txn, consumer, &stop_rx, &mut stats, &mut position)
                        .await?
                    {
                        Delivery::Acked => {}
                        Delivery::Aborted => {
                            break StopReason::Aborted(txn.transaction_id().clone())
                        }
                        Delivery::Stopped => break StopReason::Stopped,
                    }
                }
            }
        };

        Ok(RunSummary {
            stream: self.config.stream_id.clone(),
            resumed_from,
            position,
            reason,
            stats,
        })
    }

    /// Ack/Abort/중단 요청이 나올 때까지 같은 트랜잭션을 전달
    async fn deliver<C: StreamConsumer>(
        &self,
        txn: &Transaction,
        consumer: &mut C,
        stop_rx: &watch::Receiver<bool>,
        stats: &mut StreamStats,
        position: &mut Position,
    ) -> Result<Delivery> {
        loop {
            match consumer.on_transaction(txn).await {
                TransactionOutcome::Ack => {
                    let tracker = self.tracker.clone();
                    let id = txn.transaction_id().clone();
                    let outcome = run_blocking(move || tracker.advance(&id)).await?;

                    stats.transactions_committed += 1;
                    match outcome {
                        AdvanceOutcome::Advanced => {
                            *position = Position::At(txn.transaction_id().clone());
                        }
                        AdvanceOutcome::Unchanged => stats.transactions_replayed += 1,
                    }
                    return Ok(Delivery::Acked);
                }
                TransactionOutcome::Retry => {
                    stats.retries += 1;
                    debug!("Redelivering transaction {}", txn.transaction_id());
                    if stop_requested(stop_rx) {
                        return Ok(Delivery::Stopped);
                    }
                }
                TransactionOutcome::Abort => {
                    warn!("Consumer aborted at transaction {}", txn.transaction_id());
                    return Ok(Delivery::Aborted);
                }
            }
        }
    }
}

fn stop_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// 블로킹 저장소 I/O를 별도 스레드에서 실행
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CdcError::StorageUnavailable(format!("checkpoint task failed: {}", e)))?
}
