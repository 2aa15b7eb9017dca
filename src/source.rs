//! 이벤트 소스 (외부 전송 계층과의 경계)
//!
//! 소스는 이미 커밋 순서대로 정렬된 이벤트를 하나씩 내어줍니다.
//! 디코딩 실패는 `Some(Err(..))`로 전달되어 해당 트랜잭션만 중단시킵니다.

use crate::error::{CdcError, Result};
use crate::events::StreamEvent;
use crate::protocol::FrameChannel;
use std::collections::VecDeque;
use std::future::Future;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

/// 순서가 보장된 이벤트 소스
///
/// 엔진은 트랜잭션 경계에서 중단 요청과 `next_event`를 경쟁시키므로
/// `next_event`는 취소 안전해야 합니다. 완료 전에 future가 버려져도 이미 읽은
/// 바이트나 이벤트를 잃으면 안 됩니다.
pub trait EventSource: Send {
    /// 다음 이벤트 (`None`이면 스트림 종료)
    fn next_event(&mut self) -> impl Future<Output = Option<Result<StreamEvent>>> + Send;
}

/// 채널 기반 소스 (리더 태스크가 이벤트를 밀어넣음)
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<StreamEvent>>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Result<StreamEvent>>) -> Self {
        ChannelSource { rx }
    }

    /// 송신측과 소스를 함께 생성
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<StreamEvent>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ChannelSource::new(rx))
    }
}

impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        self.rx.recv().await
    }
}

/// 길이 접두 프레임 소스
pub struct FrameSource<R> {
    channel: FrameChannel<R>,
    finished: bool,
}

impl<R: AsyncRead + Unpin + Send> FrameSource<R> {
    pub fn new(reader: R) -> Self {
        FrameSource {
            channel: FrameChannel::new(reader),
            finished: false,
        }
    }

    /// 이미 연결된 프레임 채널로 생성
    pub fn from_channel(channel: FrameChannel<R>) -> Self {
        FrameSource {
            channel,
            finished: false,
        }
    }
}

impl<R: AsyncRead + Unpin + Send> EventSource for FrameSource<R> {
    async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        if self.finished {
            return None;
        }
        match self.channel.read_event().await {
            Ok(Some(decoded)) => Some(decoded),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                // 전송 에러 이후에는 프레임 경계를 신뢰할 수 없음
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// 메모리 상의 이벤트 목록 (재생/테스트용)
pub struct IterSource {
    events: VecDeque<Result<StreamEvent>>,
}

impl IterSource {
    pub fn new(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        IterSource {
            events: events.into_iter().map(Ok).collect(),
        }
    }

    /// 디코딩 실패가 섞인 입력
    pub fn from_results(events: impl IntoIterator<Item = Result<StreamEvent>>) -> Self {
        IterSource {
            events: events.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl EventSource for IterSource {
    async fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        self.events.pop_front()
    }
}

/// 전송 에러인지 여부 (디코딩 에러와 구분)
pub fn is_transport_failure(err: &CdcError) -> bool {
    matches!(err, CdcError::Transport(_) | CdcError::ChannelClosed | CdcError::IoError(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_iter_source_order() {
        let mut source = IterSource::new(vec![
            StreamEvent::schema_change("DROP TABLE a", 1).unwrap(),
            StreamEvent::checkpoint("txn-1").unwrap(),
        ]);
        assert_eq!(source.remaining(), 2);
        assert!(!source.next_event().await.unwrap().unwrap().is_checkpoint());
        assert!(source.next_event().await.unwrap().unwrap().is_checkpoint());
        assert!(source.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.send(Ok(StreamEvent::checkpoint("txn-1").unwrap())).await.unwrap();
        drop(tx);
        assert!(source.next_event().await.unwrap().is_ok());
        assert!(source.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_frame_source_stops_after_transport_error() {
        let (mut client, server) = tokio::io::duplex(256);
        let frame = codec::encode(&StreamEvent::checkpoint("txn-1").unwrap()).unwrap();
        client.write_all(&(frame.len() as u32).to_le_bytes()).await.unwrap();
        client.write_all(&frame).await.unwrap();
        // 잘린 헤더
        client.write_all(&[1]).await.unwrap();
        drop(client);

        let mut source = FrameSource::new(server);
        assert!(source.next_event().await.unwrap().is_ok());
        let err = source.next_event().await.unwrap().unwrap_err();
        assert!(is_transport_failure(&err));
        assert!(source.next_event().await.is_none());
    }
}
