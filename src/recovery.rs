//! 복구 코디네이터: 초기 리플리케이션 커서를 정확히 이 순서로 해결한다
//! (spec §4.E): durable position → master recovery → previous client position
//! → fresh capture.

use crate::error::Result;
use crate::position::{Position, PositionStore};
use crate::schema::SchemaStore;
use std::sync::Arc;
use tracing::{info, warn};

/// 마스터 복구 단계의 협력자: 새 업스트림에서 heartbeat_id를 찾고, fresh
/// capture 경로에서는 현재 tail 포지션을 돌려준다. binlog는 순차 스트림이라
/// 전통적인 임의 접근 이진 탐색은 아니다 — 후보를 좁혀가는 탐색이다.
#[async_trait::async_trait]
pub trait HeartbeatLocator: Send + Sync {
    /// `heartbeat_id`가 관측된, 그 바로 다음 이벤트의 포지션(재개 지점)을
    /// 돌려준다. 여러 후보가 있으면 retention window 내에서 가장 큰
    /// heartbeat_id를 우선한다 (spec §4.E tie-break).
    async fn locate(&self, new_server_id: u64, heartbeat_id: u64) -> Result<Option<Position>>;

    /// 업스트림의 현재 tail 포지션을 캡처한다 (fresh-capture 경로).
    async fn capture_current_position(&self, server_id: u64) -> Result<Position>;
}

pub struct RecoveryCoordinator {
    position_store: Arc<dyn PositionStore>,
    schema_store: Arc<dyn SchemaStore>,
    locator: Arc<dyn HeartbeatLocator>,
    client_id: String,
    master_recovery_enabled: bool,
}

impl RecoveryCoordinator {
    pub fn new(
        position_store: Arc<dyn PositionStore>,
        schema_store: Arc<dyn SchemaStore>,
        locator: Arc<dyn HeartbeatLocator>,
        client_id: impl Into<String>,
        master_recovery_enabled: bool,
    ) -> Self {
        RecoveryCoordinator {
            position_store,
            schema_store,
            locator,
            client_id: client_id.into(),
            master_recovery_enabled,
        }
    }

    /// §4.E의 네 전략을 정확히 이 순서로 시도해 초기 커서를 돌려준다.
    pub async fn resolve(&self, server_id: u64) -> Result<Position> {
        if let Some(p) = self.position_store.get_current(&self.client_id, server_id).await? {
            info!("recovery: durable position found, resuming at {p}");
            return Ok(p);
        }

        if self.master_recovery_enabled {
            if let Some(resolved) = self.try_master_recovery(server_id).await? {
                return Ok(resolved);
            }
        }

        if let Some(p) = self
            .position_store
            .get_previous_client_position(&self.client_id, server_id)
            .await?
        {
            info!("recovery: no position for this client, adopting previous client's position {p}");
            return Ok(p);
        }

        let p = self.locator.capture_current_position(server_id).await?;
        info!("recovery: no prior position anywhere, capturing fresh upstream position {p}");
        Ok(p)
    }

    /// spec §4.E strategy 2: binary-search the new binlog for the heartbeat
    /// row, clone the old server's snapshot under the new identity at the
    /// resume position on a hit.
    async fn try_master_recovery(&self, new_server_id: u64) -> Result<Option<Position>> {
        let Some(info) = self.position_store.get_recovery_info(&self.client_id, new_server_id).await? else {
            return Ok(None);
        };

        let Some(resume) = self.locator.locate(new_server_id, info.last_heartbeat_id).await? else {
            warn!(
                "master recovery: heartbeat {} not found on server_id={new_server_id}, falling through",
                info.last_heartbeat_id
            );
            return Ok(None);
        };

        // clone keyed at the resume position, not the heartbeat's own
        // position (DESIGN.md open-question resolution).
        self.schema_store
            .clone_for_new_server(info.server_id, new_server_id, resume.clone())
            .await?;
        info!("master recovery succeeded: resuming at {resume} under server_id={new_server_id}");
        Ok(Some(resume))
    }
}
