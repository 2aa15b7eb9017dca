/// 업데이트 스트림 소비 예제
///
/// 길이 접두 프레임으로 인코딩된 이벤트를 파일 또는 TCP 소스에서 읽어
/// 트랜잭션 단위로 로그에 출력하고, 위치를 CHECKPOINT_DIR에 저장합니다.
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use update_stream::assembler::{FailedTransaction, OrderingAnomaly, Transaction};
use update_stream::consumer::{ErrorAction, StreamConsumer, TransactionOutcome};
use update_stream::protocol::FrameChannel;
use update_stream::source::FrameSource;
use update_stream::store::FilePositionStore;
use update_stream::stream_engine::{RunSummary, StreamConfig, StreamEngine};

/// 트랜잭션을 JSON으로 로그에 남기는 소비자
struct LoggingConsumer {
    halt_on_error: bool,
}

impl StreamConsumer for LoggingConsumer {
    async fn on_transaction(&mut self, transaction: &Transaction) -> TransactionOutcome {
        match serde_json::to_string(transaction) {
            Ok(json) => {
                info!("Transaction {}: {}", transaction.transaction_id(), json);
                TransactionOutcome::Ack
            }
            Err(e) => {
                error!("Failed to serialize transaction: {}", e);
                TransactionOutcome::Abort
            }
        }
    }

    async fn on_error(&mut self, failure: &FailedTransaction) -> ErrorAction {
        warn!(
            "Transaction failed ({}), {} events discarded",
            failure.cause,
            failure.discarded.len()
        );
        if self.halt_on_error {
            ErrorAction::Halt
        } else {
            ErrorAction::Continue
        }
    }

    async fn on_anomaly(&mut self, anomaly: &OrderingAnomaly) -> ErrorAction {
        warn!("Ordering anomaly: {}", anomaly);
        ErrorAction::Continue
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt::init();

    let config = StreamConfig::from_env()?;
    let checkpoint_dir = env::var("CHECKPOINT_DIR").unwrap_or_else(|_| "./checkpoints".to_string());
    let store = Arc::new(FilePositionStore::open(&checkpoint_dir)?);

    let mut engine = StreamEngine::new(config, store);
    let stop = engine.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping at next transaction boundary");
            stop.stop();
        }
    });

    let mut consumer = LoggingConsumer {
        halt_on_error: env::var("HALT_ON_ERROR").is_ok(),
    };

    // 인자로 파일 경로가 오면 파일 재생, 아니면 STREAM_HOST:STREAM_PORT 접속
    let summary = match env::args().nth(1) {
        Some(path) => {
            info!("Replaying events from {}", path);
            let file = tokio::fs::File::open(&path).await?;
            let mut source = FrameSource::new(file);
            engine.run(&mut source, &mut consumer).await?
        }
        None => {
            let hostname = env::var("STREAM_HOST").unwrap_or_else(|_| "localhost".to_string());
            let port = env::var("STREAM_PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(4000);
            info!("Connecting to {}:{}", hostname, port);
            let channel = FrameChannel::connect(&hostname, port).await?;
            let mut source = FrameSource::from_channel(channel);
            engine.run(&mut source, &mut consumer).await?
        }
    };

    report(&summary);
    Ok(())
}

fn report(summary: &RunSummary) {
    info!(
        "Stream {} resumed from {}, now at {}",
        summary.stream, summary.resumed_from, summary.position
    );
    match serde_json::to_string(&summary.stats) {
        Ok(stats) => info!("Stats: {}", stats),
        Err(e) => warn!("Failed to serialize stats: {}", e),
    }
}
