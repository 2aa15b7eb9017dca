//! 이벤트 프레임 채널
//!
//! 전송 계층 위에서 인코딩된 StreamEvent를 길이 접두 프레임으로 주고받습니다.
//! 프레임: Payload length (4 bytes, little-endian) + Payload

use crate::codec;
use crate::error::{CdcError, Result};
use crate::events::StreamEvent;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// 최대 프레임 크기 (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// 길이 접두 프레임 채널
///
/// 읽은 바이트는 내부 버퍼에 쌓아 두므로 `read_frame` 도중 future가 취소되어도
/// 다음 호출에서 같은 프레임을 이어서 읽습니다.
pub struct FrameChannel<S> {
    stream: S,
    buffer: BytesMut,
}

impl FrameChannel<TcpStream> {
    /// TCP 연결로 채널 생성
    pub async fn connect(hostname: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", hostname, port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CdcError::Transport(format!("Failed to connect to {}: {}", addr, e)))?;

        debug!("Connected to event source at {}", addr);

        Ok(FrameChannel::new(stream))
    }
}

impl<S> FrameChannel<S> {
    pub fn new(stream: S) -> Self {
        FrameChannel {
            stream,
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> FrameChannel<S> {
    /// 프레임 읽기
    ///
    /// 프레임 경계에서 스트림이 끝나면 `Ok(None)`을 반환합니다.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| CdcError::Transport(format!("Failed to read frame: {}", e)))?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(CdcError::Transport(format!(
                    "Stream ended inside a frame ({} bytes buffered)",
                    self.buffer.len()
                )));
            }
        }
    }

    /// 버퍼에 완성된 프레임이 있으면 꺼냄
    fn parse_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }

        let length = LittleEndian::read_u32(&self.buffer[..4]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(CdcError::Transport(format!(
                "Frame of {} bytes exceeds limit of {} bytes",
                length, MAX_FRAME_SIZE
            )));
        }

        if self.buffer.len() < 4 + length {
            self.buffer.reserve(4 + length - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(4);
        Ok(Some(self.buffer.split_to(length).to_vec()))
    }

    /// 다음 이벤트 읽기
    ///
    /// 전송 에러는 바깥 `Err`, 디코딩 에러는 안쪽 `Err`로 구분합니다.
    /// 디코딩 에러는 해당 이벤트에만 영향을 주므로 스트림을 계속 읽을 수 있습니다.
    pub async fn read_event(&mut self) -> Result<Option<Result<StreamEvent>>> {
        Ok(self
            .read_frame()
            .await?
            .map(|frame| codec::decode(&frame)))
    }
}

impl<S: AsyncWrite + Unpin> FrameChannel<S> {
    /// 프레임 쓰기
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(CdcError::Transport(format!(
                "Frame of {} bytes exceeds limit of {} bytes",
                data.len(),
                MAX_FRAME_SIZE
            )));
        }

        let mut header = Vec::with_capacity(4);
        WriteBytesExt::write_u32::<LittleEndian>(&mut header, data.len() as u32)?;

        self.stream
            .write_all(&header)
            .await
            .map_err(|e| CdcError::Transport(format!("Failed to write header: {}", e)))?;
        self.stream
            .write_all(data)
            .await
            .map_err(|e| CdcError::Transport(format!("Failed to write data: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| CdcError::Transport(format!("Failed to flush: {}", e)))?;

        Ok(())
    }

    /// 이벤트 인코딩 후 프레임으로 쓰기
    pub async fn write_event(&mut self, event: &StreamEvent) -> Result<()> {
        let payload = codec::encode(event)?;
        self.write_frame(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameChannel::new(client);
        let mut reader = FrameChannel::new(server);

        let events = vec![
            StreamEvent::schema_change("CREATE TABLE t (pk int)", 3).unwrap(),
            StreamEvent::checkpoint("txn-1").unwrap(),
        ];
        for event in &events {
            writer.write_event(event).await.unwrap();
        }
        drop(writer);

        for expected in &events {
            let event = reader.read_event().await.unwrap().unwrap().unwrap();
            assert_eq!(&event, expected);
        }
        assert!(reader.read_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_inner_error() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FrameChannel::new(client);
        let mut reader = FrameChannel::new(server);

        writer.write_frame(&[42, 1, 2]).await.unwrap();
        writer.write_event(&StreamEvent::checkpoint("txn-9").unwrap()).await.unwrap();
        drop(writer);

        let first = reader.read_event().await.unwrap().unwrap();
        assert!(matches!(first, Err(CdcError::Decode(_))));
        let second = reader.read_event().await.unwrap().unwrap().unwrap();
        assert!(second.is_checkpoint());
    }

    #[tokio::test]
    async fn test_truncated_header_is_transport_error() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[5, 0]).await.unwrap();
        drop(client);

        let mut reader = FrameChannel::new(server);
        assert!(matches!(
            reader.read_frame().await,
            Err(CdcError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        drop(client);

        let mut reader = FrameChannel::new(server);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_read_keeps_partial_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = FrameChannel::new(server);

        let payload = codec::encode(&StreamEvent::checkpoint("txn-7").unwrap()).unwrap();
        let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(&payload);
        let (head, tail) = frame.split_at(6);

        client.write_all(head).await.unwrap();
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), reader.read_frame()).await;
        assert!(pending.is_err());

        client.write_all(tail).await.unwrap();
        let event = reader.read_event().await.unwrap().unwrap().unwrap();
        assert_eq!(event, StreamEvent::checkpoint("txn-7").unwrap());
    }
}
