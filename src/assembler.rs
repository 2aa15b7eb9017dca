//! 트랜잭션 조립기
//!
//! 체크포인트(POS) 사이의 DML/DDL 이벤트를 하나의 트랜잭션으로 묶습니다.
//!
//! - DML/DDL: 버퍼에 추가
//! - ERR: 체크포인트를 기다리지 않고 버퍼를 실패 트랜잭션으로 즉시 방출
//! - POS: 버퍼(비어 있어도 됨)를 완료된 트랜잭션으로 방출
//!
//! 조립기는 이벤트 순서를 절대 바꾸지 않습니다. 이전보다 작거나 같은
//! 체크포인트 ID는 OrderingAnomaly로 보고만 하고 계속 진행합니다.

use crate::error::Result;
use crate::events::{SourceError, StreamEvent};
use crate::position::TransactionId;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// 완료된 트랜잭션
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    transaction_id: TransactionId,
    events: Vec<StreamEvent>,
    sequence: u64,
    anomaly: Option<OrderingAnomaly>,
}

impl Transaction {
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// 버퍼링된 DML/DDL 이벤트 (원래 순서)
    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    /// 조립기가 부여한 순번 (1부터)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn anomaly(&self) -> Option<&OrderingAnomaly> {
        self.anomaly.as_ref()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// 데이터 이벤트 없는 keepalive 트랜잭션 여부
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 가장 늦은 이벤트 시각
    pub fn commit_timestamp(&self) -> Option<i64> {
        self.events.iter().filter_map(|e| e.timestamp()).max()
    }
}

/// 예상과 다른 체크포인트 순서
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderingAnomaly {
    pub previous: TransactionId,
    pub received: TransactionId,
}

impl OrderingAnomaly {
    pub fn is_duplicate(&self) -> bool {
        self.previous == self.received
    }
}

impl fmt::Display for OrderingAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_duplicate() {
            write!(f, "duplicate checkpoint {}", self.received)
        } else {
            write!(
                f,
                "checkpoint {} arrived after {}",
                self.received, self.previous
            )
        }
    }
}

/// 트랜잭션 실패 원인
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// 소스가 보낸 ERR 이벤트
    Source(SourceError),
    /// 디코딩/유효성 검사에 실패한 이벤트
    Malformed(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Source(e) => write!(f, "source error: {}", e),
            FailureCause::Malformed(msg) => write!(f, "malformed event: {}", msg),
        }
    }
}

/// 중단된 트랜잭션
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTransaction {
    pub cause: FailureCause,
    /// 폐기된 미완료 이벤트들
    pub discarded: Vec<StreamEvent>,
}

/// 조립 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    Committed(Transaction),
    Failed(FailedTransaction),
}

/// 트랜잭션 조립기
#[derive(Debug, Default)]
pub struct TransactionAssembler {
    buffer: Vec<StreamEvent>,
    last_checkpoint: Option<TransactionId>,
    sequence: u64,
}

impl TransactionAssembler {
    pub fn new() -> Self {
        TransactionAssembler::default()
    }

    /// 이벤트 하나 처리
    pub fn push(&mut self, event: StreamEvent) -> Option<Assembled> {
        match event {
            StreamEvent::DataChange(_) | StreamEvent::SchemaChange(_) => {
                self.buffer.push(event);
                None
            }
            StreamEvent::Error(source_error) => {
                warn!(
                    "Source error with {} buffered events: {}",
                    self.buffer.len(),
                    source_error
                );
                Some(self.fail(FailureCause::Source(source_error)))
            }
            StreamEvent::PositionCheckpoint(checkpoint) => {
                let id = checkpoint.transaction_id().clone();
                Some(Assembled::Committed(self.close(id)))
            }
        }
    }

    /// 디코딩 결과 처리
    ///
    /// 디코딩에 실패한 이벤트는 현재 트랜잭션을 중단시킵니다.
    pub fn push_decoded(&mut self, decoded: Result<StreamEvent>) -> Option<Assembled> {
        match decoded {
            Ok(event) => self.push(event),
            Err(e) => {
                warn!("Aborting current transaction on malformed event: {}", e);
                Some(self.fail(FailureCause::Malformed(e.to_string())))
            }
        }
    }

    /// 이터레이터를 지연 조립 이터레이터로 변환
    pub fn assemble<I>(self, events: I) -> Assemble<I::IntoIter>
    where
        I: IntoIterator<Item = StreamEvent>,
    {
        Assemble {
            assembler: self,
            events: events.into_iter(),
        }
    }

    /// 버퍼가 비어 있는지 (트랜잭션 경계인지)
    pub fn is_at_boundary(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_checkpoint(&self) -> Option<&TransactionId> {
        self.last_checkpoint.as_ref()
    }

    /// 미완료 버퍼 폐기 (스트림 종료 시)
    pub fn discard(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.buffer)
    }

    fn close(&mut self, id: TransactionId) -> Transaction {
        let anomaly = match &self.last_checkpoint {
            Some(previous) if id <= *previous => Some(OrderingAnomaly {
                previous: previous.clone(),
                received: id.clone(),
            }),
            _ => None,
        };
        if let Some(ref anomaly) = anomaly {
            warn!("Ordering anomaly: {}", anomaly);
        }

        // 역행한 ID로 기준점을 되돌리지 않음
        if anomaly.is_none() {
            self.last_checkpoint = Some(id.clone());
        }

        self.sequence += 1;
        let events = std::mem::take(&mut self.buffer);
        debug!(
            "Closed transaction #{} at {} with {} events",
            self.sequence,
            id,
            events.len()
        );

        Transaction {
            transaction_id: id,
            events,
            sequence: self.sequence,
            anomaly,
        }
    }

    fn fail(&mut self, cause: FailureCause) -> Assembled {
        Assembled::Failed(FailedTransaction {
            cause,
            discarded: std::mem::take(&mut self.buffer),
        })
    }
}

/// 지연 조립 이터레이터
///
/// 입력이 체크포인트 없이 끝나면 남은 버퍼는 방출하지 않습니다.
pub struct Assemble<I> {
    assembler: TransactionAssembler,
    events: I,
}

impl<I> Assemble<I> {
    /// 입력 종료 후 남은 미완료 이벤트 수
    pub fn pending(&self) -> usize {
        self.assembler.buffered()
    }
}

impl<I: Iterator<Item = StreamEvent>> Iterator for Assemble<I> {
    type Item = Assembled;

    fn next(&mut self) -> Option<Assembled> {
        for event in self.events.by_ref() {
            if let Some(assembled) = self.assembler.push(event) {
                return Some(assembled);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CdcError;
    use crate::value::{FieldSchema, FieldType, TypedValue};

    fn dml(table: &str, pk: i64) -> StreamEvent {
        StreamEvent::data_change(
            table,
            vec![FieldSchema::new("pk", FieldType::Integer)],
            vec![vec![TypedValue::Integer(pk)]],
            100 + pk,
        )
        .unwrap()
    }

    fn pos(id: &str) -> StreamEvent {
        StreamEvent::checkpoint(id).unwrap()
    }

    fn committed(a: Option<Assembled>) -> Transaction {
        match a {
            Some(Assembled::Committed(txn)) => txn,
            other => panic!("expected committed transaction, got {:?}", other),
        }
    }

    #[test]
    fn test_events_grouped_until_checkpoint() {
        let mut assembler = TransactionAssembler::new();
        let ddl = StreamEvent::schema_change("ALTER TABLE t ADD c int", 50).unwrap();

        assert!(assembler.push(dml("t", 1)).is_none());
        assert!(assembler.push(ddl.clone()).is_none());
        assert!(assembler.push(dml("t", 2)).is_none());
        assert!(!assembler.is_at_boundary());

        let txn = committed(assembler.push(pos("txn-1")));
        assert_eq!(txn.transaction_id().as_str(), "txn-1");
        assert_eq!(txn.events(), &[dml("t", 1), ddl, dml("t", 2)]);
        assert_eq!(txn.sequence(), 1);
        assert_eq!(txn.commit_timestamp(), Some(102));
        assert!(txn.anomaly().is_none());
        assert!(assembler.is_at_boundary());
    }

    #[test]
    fn test_empty_checkpoint_is_keepalive() {
        let mut assembler = TransactionAssembler::new();
        let first = committed(assembler.push(pos("txn-1")));
        let second = committed(assembler.push(pos("txn-2")));
        assert!(first.is_empty());
        assert!(second.is_empty());
        assert_eq!(second.sequence(), 2);
        assert_eq!(assembler.last_checkpoint().unwrap().as_str(), "txn-2");
    }

    #[test]
    fn test_error_flushes_buffer() {
        let mut assembler = TransactionAssembler::new();
        assembler.push(dml("t", 1));
        assembler.push(dml("t", 2));

        let out = assembler.push(StreamEvent::error("relay log corrupted", 9).unwrap());
        match out {
            Some(Assembled::Failed(failed)) => {
                assert_eq!(failed.discarded, vec![dml("t", 1), dml("t", 2)]);
                assert!(matches!(failed.cause, FailureCause::Source(ref e) if e.message() == "relay log corrupted"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(assembler.is_at_boundary());

        // 이후 체크포인트는 에러 이후 이벤트만 포함
        assembler.push(dml("t", 3));
        let txn = committed(assembler.push(pos("txn-1")));
        assert_eq!(txn.events(), &[dml("t", 3)]);
    }

    #[test]
    fn test_malformed_event_aborts_transaction() {
        let mut assembler = TransactionAssembler::new();
        assembler.push(dml("t", 1));
        let out = assembler.push_decoded(Err(CdcError::Decode("bad frame".to_string())));
        match out {
            Some(Assembled::Failed(failed)) => {
                assert_eq!(failed.discarded.len(), 1);
                assert!(matches!(failed.cause, FailureCause::Malformed(ref m) if m.contains("bad frame")));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_ordering_anomaly_reported() {
        let mut assembler = TransactionAssembler::new();
        committed(assembler.push(pos("txn-2")));

        let dup = committed(assembler.push(pos("txn-2")));
        let anomaly = dup.anomaly().unwrap();
        assert!(anomaly.is_duplicate());

        let back = committed(assembler.push(pos("txn-1")));
        let anomaly = back.anomaly().unwrap();
        assert_eq!(anomaly.previous.as_str(), "txn-2");
        assert_eq!(anomaly.received.as_str(), "txn-1");
        assert!(!anomaly.is_duplicate());

        // 기준점은 가장 앞선 ID 유지
        let next = committed(assembler.push(pos("txn-3")));
        assert!(next.anomaly().is_none());
    }

    #[test]
    fn test_lazy_assembly() {
        let events = vec![
            dml("a", 1),
            pos("txn-1"),
            StreamEvent::schema_change("DROP TABLE b", 7).unwrap(),
            pos("txn-2"),
            dml("a", 2),
        ];
        let mut iter = TransactionAssembler::new().assemble(events);

        let first = committed(iter.next());
        assert_eq!(first.len(), 1);
        let second = committed(iter.next());
        assert_eq!(second.events()[0].statement().unwrap(), "DROP TABLE b");
        assert!(iter.next().is_none());
        assert_eq!(iter.pending(), 1);
    }
}
