//! 포지션 스토어: 영속 `{current, recovery_candidates[]}`.
//!
//! 쓰기는 단조 증가만 허용한다 — `set(p)`는 `p < current`이면 거부된다.
//! 실서비스에서는 `positions`/`heartbeats` 메타데이터 테이블에 쓰지만,
//! 이 타입 자체는 저장소에 구애받지 않도록 트레이트 뒤에 둔다.

use super::{Position, RecoveryInfo};
use crate::error::{CdcError, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::Pool;
use std::collections::HashMap;

/// 복구 코디네이터/리플리케이터가 의존하는, 영속성에 구애받지 않는 계약.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// 이 (client_id, server_id)에 대한 현재 커밋된 포지션.
    async fn get_current(&self, client_id: &str, server_id: u64) -> Result<Option<Position>>;

    /// 단조성을 강제하며 현재 포지션을 교체한다.
    async fn set(&self, client_id: &str, server_id: u64, position: Position) -> Result<()>;

    /// 다른 client_id가 이 업스트림에 대해 마지막으로 쓴 포지션.
    async fn get_previous_client_position(&self, client_id: &str, server_id: u64) -> Result<Option<Position>>;

    /// 하트비트 커밋 시 기록되는 복구 후보. `different server_id`에서 쓴
    /// 것만 돌려준다 — 같은 서버가 계속 살아있다면 마스터 복구를 시도할
    /// 이유가 없기 때문이다.
    async fn get_recovery_info(&self, client_id: &str, current_server_id: u64) -> Result<Option<RecoveryInfo>>;

    async fn record_heartbeat(&self, info: RecoveryInfo) -> Result<()>;

    /// 현재 확립된 커서보다 오래된 복구 정보를 정리한다.
    async fn cleanup_old_recovery_infos(&self, client_id: &str, established: &Position) -> Result<()>;
}

/// 테스트/임베딩용 인메모리 구현. 운영 빌드는 메타데이터 DB에 쓰는
/// `MySqlPositionStore`를 사용한다 (스키마 스토어와 같은 연결 패턴, §6).
#[derive(Default)]
pub struct InMemoryPositionStore {
    inner: parking_lot::Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    current: HashMap<(String, u64), Position>,
    recovery: Vec<RecoveryInfo>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn get_current(&self, client_id: &str, server_id: u64) -> Result<Option<Position>> {
        let inner = self.inner.lock();
        Ok(inner.current.get(&(client_id.to_string(), server_id)).cloned())
    }

    async fn set(&self, client_id: &str, server_id: u64, position: Position) -> Result<()> {
        let mut inner = self.inner.lock();
        let key = (client_id.to_string(), server_id);
        if let Some(existing) = inner.current.get(&key) {
            if position < *existing {
                return Err(CdcError::Other(format!(
                    "position store rejected non-monotonic write: {position} < {existing}"
                )));
            }
        }
        inner.current.insert(key, position);
        Ok(())
    }

    async fn get_previous_client_position(&self, client_id: &str, server_id: u64) -> Result<Option<Position>> {
        let inner = self.inner.lock();
        Ok(inner
            .current
            .iter()
            .filter(|((c, s), _)| c != client_id && *s == server_id)
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(_, p)| p.clone()))
    }

    async fn get_recovery_info(&self, _client_id: &str, current_server_id: u64) -> Result<Option<RecoveryInfo>> {
        let inner = self.inner.lock();
        Ok(inner
            .recovery
            .iter()
            .filter(|r| r.server_id != current_server_id)
            .max_by_key(|r| r.last_heartbeat_id)
            .cloned())
    }

    async fn record_heartbeat(&self, info: RecoveryInfo) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.recovery.push(info);
        Ok(())
    }

    async fn cleanup_old_recovery_infos(&self, _client_id: &str, established: &Position) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.recovery.retain(|r| r.position >= *established);
        Ok(())
    }
}

/// 운영용 MySQL 백엔드. `positions`(client_id, server_id) PK로 현재 커서를,
/// `heartbeats`에 복구 후보를 기록한다 (§6의 bit-exact 메타데이터 스키마).
pub struct MySqlPositionStore {
    pool: Pool,
}

impl MySqlPositionStore {
    pub fn new(pool: Pool) -> Self {
        MySqlPositionStore { pool }
    }

    fn row_to_position(file: String, offset: u64, gtid: Option<String>, heartbeat: Option<u64>) -> Position {
        let mut position = Position::new(file, offset);
        if let Some(g) = gtid.and_then(|g| crate::gtid::GtidSet::parse(&g).ok()) {
            position = position.with_gtid_set(g);
        }
        if let Some(h) = heartbeat {
            position = position.with_heartbeat_id(h);
        }
        position
    }
}

#[async_trait]
impl PositionStore for MySqlPositionStore {
    async fn get_current(&self, client_id: &str, server_id: u64) -> Result<Option<Position>> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        let row: Option<(String, u64, Option<String>, Option<u64>)> = conn
            .exec_first(
                "SELECT binlog_file, offset, gtid_set, heartbeat_id FROM positions WHERE client_id = :client_id AND server_id = :server_id",
                mysql_async::params! { "client_id" => client_id, "server_id" => server_id },
            )
            .await
            .map_err(|e| CdcError::QueryError(e.to_string()))?;

        Ok(row.map(|(file, offset, gtid, heartbeat)| Self::row_to_position(file, offset, gtid, heartbeat)))
    }

    async fn set(&self, client_id: &str, server_id: u64, position: Position) -> Result<()> {
        if let Some(existing) = self.get_current(client_id, server_id).await? {
            if position < existing {
                return Err(CdcError::Other(format!(
                    "position store rejected non-monotonic write: {position} < {existing}"
                )));
            }
        }

        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        conn.exec_drop(
            "INSERT INTO positions (client_id, server_id, binlog_file, offset, gtid_set, heartbeat_id, updated_at) \
             VALUES (:client_id, :server_id, :binlog_file, :offset, :gtid_set, :heartbeat_id, NOW()) \
             ON DUPLICATE KEY UPDATE binlog_file = VALUES(binlog_file), offset = VALUES(offset), \
             gtid_set = VALUES(gtid_set), heartbeat_id = VALUES(heartbeat_id), updated_at = NOW()",
            mysql_async::params! {
                "client_id" => client_id,
                "server_id" => server_id,
                "binlog_file" => &position.binlog_file,
                "offset" => position.offset,
                "gtid_set" => position.gtid_set.as_ref().map(|g| g.to_string()),
                "heartbeat_id" => position.heartbeat_id,
            },
        )
        .await
        .map_err(|e| CdcError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn get_previous_client_position(&self, client_id: &str, server_id: u64) -> Result<Option<Position>> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        let row: Option<(String, u64, Option<String>, Option<u64>)> = conn
            .exec_first(
                "SELECT binlog_file, offset, gtid_set, heartbeat_id FROM positions \
                 WHERE client_id != :client_id AND server_id = :server_id ORDER BY updated_at DESC LIMIT 1",
                mysql_async::params! { "client_id" => client_id, "server_id" => server_id },
            )
            .await
            .map_err(|e| CdcError::QueryError(e.to_string()))?;

        Ok(row.map(|(file, offset, gtid, heartbeat)| Self::row_to_position(file, offset, gtid, heartbeat)))
    }

    async fn get_recovery_info(&self, client_id: &str, current_server_id: u64) -> Result<Option<RecoveryInfo>> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        let row: Option<(u64, String, u64, Option<String>, u64)> = conn
            .exec_first(
                "SELECT server_id, binlog_file, offset, gtid_set, heartbeat_id FROM heartbeats \
                 WHERE server_id != :current_server_id ORDER BY heartbeat_id DESC LIMIT 1",
                mysql_async::params! { "current_server_id" => current_server_id },
            )
            .await
            .map_err(|e| CdcError::QueryError(e.to_string()))?;

        Ok(row.map(|(server_id, file, offset, gtid, heartbeat_id)| RecoveryInfo {
            server_id,
            position: Self::row_to_position(file, offset, gtid, None),
            last_heartbeat_id: heartbeat_id,
            client_id: client_id.to_string(),
        }))
    }

    async fn record_heartbeat(&self, info: RecoveryInfo) -> Result<()> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        conn.exec_drop(
            "INSERT INTO heartbeats (client_id, server_id, binlog_file, offset, gtid_set, heartbeat_id) \
             VALUES (:client_id, :server_id, :binlog_file, :offset, :gtid_set, :heartbeat_id)",
            mysql_async::params! {
                "client_id" => &info.client_id,
                "server_id" => info.server_id,
                "binlog_file" => &info.position.binlog_file,
                "offset" => info.position.offset,
                "gtid_set" => info.position.gtid_set.as_ref().map(|g| g.to_string()),
                "heartbeat_id" => info.last_heartbeat_id,
            },
        )
        .await
        .map_err(|e| CdcError::QueryError(e.to_string()))?;
        Ok(())
    }

    async fn cleanup_old_recovery_infos(&self, _client_id: &str, established: &Position) -> Result<()> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        conn.exec_drop(
            "DELETE FROM heartbeats WHERE offset < :offset",
            mysql_async::params! { "offset" => established.offset },
        )
        .await
        .map_err(|e| CdcError::QueryError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    #[tokio::test]
    async fn monotonic_writes_are_enforced() {
        let store = InMemoryPositionStore::new();
        store.set("c1", 1, Position::new("mysql-bin.000001", 100)).await.unwrap();
        let err = store.set("c1", 1, Position::new("mysql-bin.000001", 50)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn recovery_info_only_from_different_server() {
        let store = InMemoryPositionStore::new();
        store
            .record_heartbeat(RecoveryInfo {
                server_id: 10,
                position: Position::new("mysql-bin.000001", 500),
                last_heartbeat_id: 7,
                client_id: "c1".to_string(),
            })
            .await
            .unwrap();

        assert!(store.get_recovery_info("c1", 10).await.unwrap().is_none());
        let info = store.get_recovery_info("c1", 20).await.unwrap().unwrap();
        assert_eq!(info.last_heartbeat_id, 7);
    }

    #[tokio::test]
    async fn cleanup_purges_recovery_infos_older_than_established() {
        let store = InMemoryPositionStore::new();
        store
            .record_heartbeat(RecoveryInfo {
                server_id: 10,
                position: Position::new("mysql-bin.000001", 100),
                last_heartbeat_id: 1,
                client_id: "c1".to_string(),
            })
            .await
            .unwrap();

        store
            .cleanup_old_recovery_infos("c1", &Position::new("mysql-bin.000001", 200))
            .await
            .unwrap();

        assert!(store.get_recovery_info("c1", 20).await.unwrap().is_none());
    }
}
