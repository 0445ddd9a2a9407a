//! HA 리스: 선출 프리미티브는 이 크레이트 바깥의 블랙박스다 (spec §9 "HA lease
//! as external"). 여기서는 소비 계약만 트레이트로 고정하고, 외부 조정 서비스
//! 없이 단독 실행할 수 있도록 항상-리더 구현 하나만 둔다.

use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    Acquired,
    Lost,
}

/// `run(member) -> leadership` 계약. 리더는 핸들을 쥐고 있는 동안 리더이며,
/// 놓으면 리더십을 반납한다 — 팔로워는 핫 스키마 스냅샷을 유지하지 않는다.
#[async_trait::async_trait]
pub trait LeaseProvider: Send + Sync {
    async fn acquire(&self, member: &str) -> broadcast::Receiver<LeadershipEvent>;
}

/// 외부 조정 서비스(etcd/Raft 등) 없이 단독 실행할 때 쓰는 항상-리더 구현.
/// 실제 분산 리스 제공자는 같은 트레이트를 구현해 갈아 끼우면 된다.
pub struct SingleNodeLease {
    tx: broadcast::Sender<LeadershipEvent>,
}

impl Default for SingleNodeLease {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(8);
        SingleNodeLease { tx }
    }
}

impl SingleNodeLease {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LeaseProvider for SingleNodeLease {
    async fn acquire(&self, member: &str) -> broadcast::Receiver<LeadershipEvent> {
        info!("{member} acquiring single-node lease (always leader, no coordination service)");
        let rx = self.tx.subscribe();
        let _ = self.tx.send(LeadershipEvent::Acquired);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_node_lease_immediately_grants_leadership() {
        let lease = SingleNodeLease::new();
        let mut rx = lease.acquire("node-a").await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event, LeadershipEvent::Acquired);
    }
}
