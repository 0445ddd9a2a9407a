//! 프로듀서 싱크: `enqueue(record) -> ack`, `flush() -> ()` 소비 계약
//! (spec §6). 실행 가능한 바이너리를 위한 두 구현을 제공한다.

use crate::error::{CdcError, Result};
use crate::record::Record;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

#[async_trait]
pub trait Producer: Send + Sync {
    async fn enqueue(&self, record: Record) -> Result<()>;
    async fn flush(&self) -> Result<()>;
}

/// 정규 JSON 레코드를 `tracing`으로 내보내는 최소 구현.
#[derive(Default)]
pub struct LoggingProducer;

#[async_trait]
impl Producer for LoggingProducer {
    async fn enqueue(&self, record: Record) -> Result<()> {
        let json = serde_json::to_string(&record)?;
        info!(target: "producer", "{json}");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// 임베딩용: bounded 채널로 레코드를 넘긴다. 채널이 가득 차면 `enqueue`가
/// 백프레셔를 걸어 대기한다 (spec §5 bounded emit queue).
pub struct ChannelProducer {
    tx: mpsc::Sender<Record>,
}

impl ChannelProducer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelProducer { tx }, rx)
    }
}

#[async_trait]
impl Producer for ChannelProducer {
    async fn enqueue(&self, record: Record) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|e| CdcError::ProducerError(e.to_string()))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;
    use std::collections::HashMap;

    #[tokio::test]
    async fn channel_producer_delivers_in_order() {
        let (producer, mut rx) = ChannelProducer::new(4);
        producer
            .enqueue(Record::insert(Position::new("mysql-bin.000001", 4), "d".to_string(), "u".to_string(), HashMap::new()))
            .await
            .unwrap();
        producer
            .enqueue(Record::insert(Position::new("mysql-bin.000001", 8), "d".to_string(), "u".to_string(), HashMap::new()))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.position.offset, 4);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.position.offset, 8);
    }

    #[tokio::test]
    async fn logging_producer_never_fails_on_serializable_record() {
        let producer = LoggingProducer;
        let record = Record::ddl(Position::new("mysql-bin.000001", 4), "d".to_string(), "CREATE TABLE u (id INT)".to_string());
        producer.enqueue(record).await.unwrap();
        producer.flush().await.unwrap();
    }
}
