//! 하트비트 이미터: 설정된 주기로 업스트림의 well-known 마커 테이블에 행을
//! 쓴다. 결과 binlog 이벤트는 단조 증가하는 heartbeat_id를 싣고, 스트림에서
//! 이를 관찰하는 것이 포지션 커밋을 트리거한다 (spec §4.H).

use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 하트비트 마커가 쓰이는 well-known 테이블. `HeartbeatSink`가 여기에
/// 쓰고, binlog 클라이언트는 이 테이블에 대한 `WriteRows`를
/// `BinlogEventData::Heartbeat`로 재해석한다 (spec §4.H).
pub const HEARTBEAT_MARKER_TABLE: &str = "_cdc_heartbeat";

/// 업스트림에 마커 행을 쓰는 협력자. 실제 구현은 `connection::MySqlConnection`을
/// 통해 well-known 테이블에 INSERT한다.
#[async_trait::async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn write_marker(&self, heartbeat_id: u64) -> Result<()>;
}

pub struct HeartbeatEmitter {
    sink: Arc<dyn HeartbeatSink>,
    period: Duration,
    next_id: AtomicU64,
}

impl HeartbeatEmitter {
    pub fn new(sink: Arc<dyn HeartbeatSink>, period: Duration) -> Self {
        HeartbeatEmitter {
            sink,
            period,
            next_id: AtomicU64::new(1),
        }
    }

    /// 중단 신호가 올 때까지 주기적으로 마커를 쓴다.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    debug!("writing heartbeat marker id={id}");
                    self.sink.write_marker(id).await?;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<u64>>,
    }

    #[async_trait::async_trait]
    impl HeartbeatSink for RecordingSink {
        async fn write_marker(&self, heartbeat_id: u64) -> Result<()> {
            self.written.lock().push(heartbeat_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn heartbeat_ids_are_monotonically_increasing() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = Arc::new(HeartbeatEmitter::new(sink.clone(), Duration::from_millis(5)));
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn({
            let emitter = emitter.clone();
            async move { emitter.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();
        let _ = handle.await;

        let ids = sink.written.lock().clone();
        assert!(ids.len() >= 2, "expected at least two heartbeats, got {ids:?}");
        for w in ids.windows(2) {
            assert!(w[1] > w[0]);
        }
    }
}
