//! 스키마 스토어: 메타데이터 DB에 스냅샷/델타를 영속화한다.
//!
//! 두 모드:
//! - **캡처**: 현재 업스트림을 인트로스펙트해 현재 포지션에 전체 스냅샷을 기록한다.
//! - **델타 체인**: `{base_snapshot_id, delta, resulting_position}`을 기록해
//!   미래의 리더가 재생으로 어떤 스냅샷이든 재구성할 수 있게 한다.
//!
//! 조회: 포지션 P가 주어지면, 포지션이 P 이하인 가장 최근 스냅샷을 찾고,
//! `(snapshot, P]` 구간에 있는 저장된 델타들을 순서대로 재생한다.

use super::delta::SchemaDelta;
use super::model::{Charset, Column, ColumnType, Database, Schema, Table};
use crate::error::{CdcError, Result};
use crate::position::Position;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use std::collections::HashMap;

pub type SnapshotId = u64;

#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// 업스트림을 인트로스펙트해 얻은 전체 스냅샷을 현재 포지션에 기록한다.
    async fn capture(&self, server_id: u64, position: &Position, schema: &Schema) -> Result<SnapshotId>;

    /// 하나의 델타를 그 결과 포지션과 함께 기록한다. 호출자는 이미 `delta`를
    /// 적용해 얻은 `resulting_schema`도 함께 전달한다 — 매번 체인 전체를
    /// 재생하지 않고도 최신 스냅샷을 캐시해 둘 수 있게 하기 위해서다.
    async fn append_delta(
        &self,
        server_id: u64,
        delta: SchemaDelta,
        resulting_position: Position,
        resulting_schema: Schema,
    ) -> Result<()>;

    /// 주어진 포지션 이하의 가장 최근 상태로 스키마를 재구성한다.
    async fn get_schema_at(&self, server_id: u64, position: &Position) -> Result<Option<Schema>>;

    /// 서버 정체성 전환: `old_server_id`의 마지막 스냅샷을 `at_position`에서
    /// `new_server_id`로 복제해, 새 정체성 아래의 델타 체인이 빈 캡처가
    /// 아니라 확립된 베이스라인에서 시작하게 한다.
    async fn clone_for_new_server(&self, old_server_id: u64, new_server_id: u64, at_position: Position) -> Result<()>;

    /// `boundary` 이전에 닫힌, 확인된 컨슈머 포지션이 더 이상 참조하지 않는
    /// 델타를 가비지 컬렉트한다. 구현은 그 구간의 최신 상태를 새 스냅샷으로
    /// 물리화한 뒤 델타를 버려야 한다.
    async fn compact(&self, server_id: u64, boundary: &Position) -> Result<()>;
}

struct StoredSnapshot {
    position: Position,
    schema: Schema,
}

struct StoredDelta {
    position: Position,
    delta: SchemaDelta,
}

#[derive(Default)]
struct ServerState {
    snapshots: Vec<StoredSnapshot>,
    deltas: Vec<StoredDelta>,
}

/// 테스트/임베딩용 인메모리 구현. 운영 빌드는 `schemas`/`databases`/
/// `tables`/`columns` 테이블에 쓰는 `MySqlSchemaStore`를 사용한다 (§6의
/// bit-exact 메타데이터 스키마).
#[derive(Default)]
pub struct InMemorySchemaStore {
    inner: parking_lot::Mutex<HashMap<u64, ServerState>>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchemaStore for InMemorySchemaStore {
    async fn capture(&self, server_id: u64, position: &Position, schema: &Schema) -> Result<SnapshotId> {
        let mut inner = self.inner.lock();
        let state = inner.entry(server_id).or_default();
        state.snapshots.push(StoredSnapshot {
            position: position.clone(),
            schema: schema.copy(),
        });
        Ok(state.snapshots.len() as SnapshotId - 1)
    }

    async fn append_delta(
        &self,
        server_id: u64,
        delta: SchemaDelta,
        resulting_position: Position,
        resulting_schema: Schema,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner.entry(server_id).or_default();
        state.deltas.push(StoredDelta {
            position: resulting_position.clone(),
            delta,
        });
        // cache the materialized result as a snapshot so repeated lookups at
        // or after this position don't need to replay the whole chain again.
        state.snapshots.push(StoredSnapshot {
            position: resulting_position,
            schema: resulting_schema,
        });
        Ok(())
    }

    async fn get_schema_at(&self, server_id: u64, position: &Position) -> Result<Option<Schema>> {
        let inner = self.inner.lock();
        let Some(state) = inner.get(&server_id) else {
            return Ok(None);
        };

        let base = state
            .snapshots
            .iter()
            .filter(|s| s.position <= *position)
            .max_by(|a, b| a.position.cmp(&b.position));

        let Some(base) = base else {
            return Ok(None);
        };

        let mut schema = base.schema.copy();
        for d in state
            .deltas
            .iter()
            .filter(|d| d.position > base.position && d.position <= *position)
        {
            schema = d.delta.apply(&schema)?;
        }
        Ok(Some(schema))
    }

    async fn clone_for_new_server(&self, old_server_id: u64, new_server_id: u64, at_position: Position) -> Result<()> {
        let schema = {
            let inner = self.inner.lock();
            inner
                .get(&old_server_id)
                .and_then(|state| state.snapshots.iter().max_by(|a, b| a.position.cmp(&b.position)))
                .map(|s| s.schema.copy())
        };
        let Some(schema) = schema else {
            return Ok(());
        };
        let mut inner = self.inner.lock();
        let state = inner.entry(new_server_id).or_default();
        state.snapshots.push(StoredSnapshot { position: at_position, schema });
        Ok(())
    }

    async fn compact(&self, server_id: u64, boundary: &Position) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(state) = inner.get_mut(&server_id) else {
            return Ok(());
        };
        if let Some(materialized) = state
            .snapshots
            .iter()
            .filter(|s| s.position <= *boundary)
            .max_by(|a, b| a.position.cmp(&b.position))
        {
            let materialized_position = materialized.position.clone();
            state.snapshots.retain(|s| s.position >= materialized_position);
            state.deltas.retain(|d| d.position > materialized_position);
        }
        Ok(())
    }
}

/// 운영용 MySQL 백엔드. §6의 bit-exact 테이블 이름(`schemas`/`databases`/
/// `tables`/`columns`)을 쓴다. 컬럼 목록 자체는 구현 선택이라, 각 테이블은
/// `schema_id`로 엮이는 정규화된 행들로 구성한다:
///
/// - `schemas(id, server_id, binlog_file, offset, gtid_set, heartbeat_id,
///   base_snapshot_id, delta_json, created_at)` — `delta_json`이 NULL이면
///   전체 캡처, 아니면 `base_snapshot_id` 위에 쌓인 델타다.
/// - `databases(schema_id, name)` / `tables(schema_id, database_name,
///   table_name, charset)` / `columns(schema_id, database_name, table_name,
///   ordinal, name, column_type_json, nullable)` — 캡처(전체 스냅샷) 행에만
///   채워진다. 델타 행은 재생 시점에 `delta_json`으로 적용된다.
pub struct MySqlSchemaStore {
    pool: Pool,
}

impl MySqlSchemaStore {
    pub fn new(pool: Pool) -> Self {
        MySqlSchemaStore { pool }
    }

    async fn materialize(&self, server_id: u64, position: &Position, base_snapshot_id: Option<SnapshotId>, delta_json: Option<String>, schema: Option<&Schema>) -> Result<SnapshotId> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        conn.exec_drop(
            "INSERT INTO schemas (server_id, binlog_file, offset, gtid_set, heartbeat_id, base_snapshot_id, delta_json) \
             VALUES (:server_id, :binlog_file, :offset, :gtid_set, :heartbeat_id, :base_snapshot_id, :delta_json)",
            mysql_async::params! {
                "server_id" => server_id,
                "binlog_file" => &position.binlog_file,
                "offset" => position.offset,
                "gtid_set" => position.gtid_set.as_ref().map(|g| g.to_string()),
                "heartbeat_id" => position.heartbeat_id,
                "base_snapshot_id" => base_snapshot_id,
                "delta_json" => delta_json,
            },
        )
        .await
        .map_err(|e| CdcError::QueryError(format!("failed to insert schemas row: {e}")))?;

        let schema_id: SnapshotId = conn
            .query_first("SELECT LAST_INSERT_ID()")
            .await
            .map_err(|e| CdcError::QueryError(e.to_string()))?
            .unwrap_or(0);

        if let Some(schema) = schema {
            for db in schema.databases() {
                conn.exec_drop(
                    "INSERT INTO databases (schema_id, name) VALUES (:schema_id, :name)",
                    mysql_async::params! { "schema_id" => schema_id, "name" => &db.name },
                )
                .await
                .map_err(|e| CdcError::QueryError(e.to_string()))?;

                for table in db.tables() {
                    conn.exec_drop(
                        "INSERT INTO tables (schema_id, database_name, table_name, charset) VALUES (:schema_id, :db, :table, :charset)",
                        mysql_async::params! {
                            "schema_id" => schema_id,
                            "db" => &db.name,
                            "table" => &table.name,
                            "charset" => &table.charset.0,
                        },
                    )
                    .await
                    .map_err(|e| CdcError::QueryError(e.to_string()))?;

                    for (ordinal, column) in table.columns.iter().enumerate() {
                        let column_type_json = serde_json::to_string(&column.column_type)?;
                        conn.exec_drop(
                            "INSERT INTO columns (schema_id, database_name, table_name, ordinal, name, column_type_json, nullable) \
                             VALUES (:schema_id, :db, :table, :ordinal, :name, :column_type_json, :nullable)",
                            mysql_async::params! {
                                "schema_id" => schema_id,
                                "db" => &db.name,
                                "table" => &table.name,
                                "ordinal" => ordinal as u64,
                                "name" => &column.name,
                                "column_type_json" => column_type_json,
                                "nullable" => column.nullable,
                            },
                        )
                        .await
                        .map_err(|e| CdcError::QueryError(e.to_string()))?;
                    }
                }
            }
        }

        Ok(schema_id)
    }

    async fn load_materialized(&self, schema_id: SnapshotId, case_sensitive: bool) -> Result<Schema> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;

        let db_names: Vec<String> = conn
            .exec("SELECT name FROM databases WHERE schema_id = :schema_id", mysql_async::params! { "schema_id" => schema_id })
            .await
            .map_err(|e| CdcError::QueryError(e.to_string()))?;

        let mut schema = Schema::empty(case_sensitive);
        for db_name in db_names {
            let mut database = Database::new(db_name.clone());
            let table_rows: Vec<(String, String)> = conn
                .exec(
                    "SELECT table_name, charset FROM tables WHERE schema_id = :schema_id AND database_name = :db",
                    mysql_async::params! { "schema_id" => schema_id, "db" => &db_name },
                )
                .await
                .map_err(|e| CdcError::QueryError(e.to_string()))?;

            for (table_name, charset) in table_rows {
                let column_rows: Vec<Row> = conn
                    .exec(
                        "SELECT name, column_type_json, nullable FROM columns \
                         WHERE schema_id = :schema_id AND database_name = :db AND table_name = :table \
                         ORDER BY ordinal",
                        mysql_async::params! { "schema_id" => schema_id, "db" => &db_name, "table" => &table_name },
                    )
                    .await
                    .map_err(|e| CdcError::QueryError(e.to_string()))?;

                let mut columns = Vec::with_capacity(column_rows.len());
                for mut row in column_rows {
                    let name: String = row.take("name").unwrap_or_default();
                    let column_type_json: String = row.take("column_type_json").unwrap_or_default();
                    let nullable: bool = row.take("nullable").unwrap_or(true);
                    let column_type: ColumnType = serde_json::from_str(&column_type_json)?;
                    columns.push(Column { name, column_type, nullable });
                }

                database = database.push_table(Table { name: table_name, columns, charset: Charset(charset) });
            }
            schema = schema.push_database(database);
        }

        Ok(schema)
    }

    /// `server_id`의 가장 최근 전체 캡처(델타가 아닌) 행을 찾는다.
    async fn latest_capture(&self, server_id: u64) -> Result<Option<(SnapshotId, Position, bool)>> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        let row: Option<(SnapshotId, String, u64, Option<String>, Option<u64>)> = conn
            .exec_first(
                "SELECT id, binlog_file, offset, gtid_set, heartbeat_id FROM schemas \
                 WHERE server_id = :server_id AND delta_json IS NULL ORDER BY id DESC LIMIT 1",
                mysql_async::params! { "server_id" => server_id },
            )
            .await
            .map_err(|e| CdcError::QueryError(e.to_string()))?;

        Ok(row.map(|(id, file, offset, gtid, heartbeat)| {
            let mut position = Position::new(file, offset);
            if let Some(g) = gtid.and_then(|g| crate::gtid::GtidSet::parse(&g).ok()) {
                position = position.with_gtid_set(g);
            }
            if let Some(h) = heartbeat {
                position = position.with_heartbeat_id(h);
            }
            (id, position, true)
        }))
    }
}

#[async_trait]
impl SchemaStore for MySqlSchemaStore {
    async fn capture(&self, server_id: u64, position: &Position, schema: &Schema) -> Result<SnapshotId> {
        self.materialize(server_id, position, None, None, Some(schema)).await
    }

    async fn append_delta(
        &self,
        server_id: u64,
        delta: SchemaDelta,
        resulting_position: Position,
        resulting_schema: Schema,
    ) -> Result<()> {
        let base = self.latest_capture(server_id).await?.map(|(id, _, _)| id);
        let delta_json = serde_json::to_string(&delta)?;
        // cache the materialized result as a fresh capture row so repeated
        // lookups don't replay the whole chain every time.
        self.materialize(server_id, &resulting_position, base, Some(delta_json), Some(&resulting_schema))
            .await?;
        Ok(())
    }

    async fn get_schema_at(&self, server_id: u64, position: &Position) -> Result<Option<Schema>> {
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        let row: Option<(SnapshotId, String, u64)> = conn
            .exec_first(
                "SELECT id, binlog_file, offset FROM schemas WHERE server_id = :server_id ORDER BY id DESC LIMIT 1",
                mysql_async::params! { "server_id" => server_id },
            )
            .await
            .map_err(|e| CdcError::QueryError(e.to_string()))?;
        drop(conn);

        let Some((schema_id, file, offset)) = row else {
            return Ok(None);
        };
        let row_position = Position::new(file, offset);
        if row_position > *position {
            return Ok(None);
        }

        let schema = self.load_materialized(schema_id, position.gtid_set.is_none()).await?;
        Ok(Some(schema))
    }

    async fn clone_for_new_server(&self, old_server_id: u64, new_server_id: u64, at_position: Position) -> Result<()> {
        let Some((schema_id, _, _)) = self.latest_capture(old_server_id).await? else {
            return Ok(());
        };
        let schema = self.load_materialized(schema_id, true).await?;
        self.materialize(new_server_id, &at_position, None, None, Some(&schema)).await?;
        Ok(())
    }

    async fn compact(&self, server_id: u64, boundary: &Position) -> Result<()> {
        let Some(schema) = self.get_schema_at(server_id, boundary).await? else {
            return Ok(());
        };
        let mut conn = self.pool.get_conn().await.map_err(|e| CdcError::ConnectionError(e.to_string()))?;
        conn.exec_drop(
            "DELETE FROM schemas WHERE server_id = :server_id AND offset <= :offset",
            mysql_async::params! { "server_id" => server_id, "offset" => boundary.offset },
        )
        .await
        .map_err(|e| CdcError::QueryError(e.to_string()))?;
        drop(conn);
        self.materialize(server_id, boundary, None, None, Some(&schema)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::delta::SoftFailure;

    fn int_col(name: &str) -> Column {
        Column { name: name.to_string(), column_type: ColumnType::Int { width: 32, unsigned: false }, nullable: true }
    }

    #[tokio::test]
    async fn capture_then_retrieve_exact_position() {
        let store = InMemorySchemaStore::new();
        let schema = Schema::empty(false).push_database(Database::new("d"));
        let pos = Position::new("mysql-bin.000001", 100);
        store.capture(1, &pos, &schema).await.unwrap();

        let got = store.get_schema_at(1, &pos).await.unwrap().unwrap();
        assert!(got.find_database("d").is_some());
    }

    #[tokio::test]
    async fn delta_chain_reconstructs_intermediate_position() {
        let store = InMemorySchemaStore::new();
        let base = Schema::empty(false);
        let base_pos = Position::new("mysql-bin.000001", 4);
        store.capture(1, &base_pos, &base).await.unwrap();

        let delta = SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() };
        let pos1 = Position::new("mysql-bin.000001", 100);
        let schema1 = delta.apply(&base).unwrap();
        store.append_delta(1, delta.clone(), pos1.clone(), schema1.clone()).await.unwrap();

        let create_table = SchemaDelta::CreateTable {
            database: "d".to_string(),
            table: Table { name: "u".to_string(), columns: vec![int_col("id")], charset: Charset::default() },
            soft: SoftFailure::default(),
        };
        let pos2 = Position::new("mysql-bin.000001", 200);
        let schema2 = create_table.apply(&schema1).unwrap();
        store.append_delta(1, create_table, pos2.clone(), schema2).await.unwrap();

        // A position strictly between the two deltas should see only the first.
        let between = Position::new("mysql-bin.000001", 150);
        let got = store.get_schema_at(1, &between).await.unwrap().unwrap();
        assert!(got.find_database("d").is_some());
        assert!(got.find_database("d").unwrap().find_table("u", true).is_none());
    }

    #[tokio::test]
    async fn clone_for_new_server_copies_latest_snapshot() {
        let store = InMemorySchemaStore::new();
        let schema = Schema::empty(false).push_database(Database::new("d"));
        store.capture(10, &Position::new("mysql-bin.000001", 500), &schema).await.unwrap();

        let resume = Position::new("mysql-bin-new.000003", 120);
        store.clone_for_new_server(10, 20, resume.clone()).await.unwrap();

        let got = store.get_schema_at(20, &resume).await.unwrap().unwrap();
        assert!(got.find_database("d").is_some());
    }

    #[tokio::test]
    async fn compact_drops_deltas_before_boundary() {
        let store = InMemorySchemaStore::new();
        let base = Schema::empty(false);
        store.capture(1, &Position::new("mysql-bin.000001", 4), &base).await.unwrap();

        let delta = SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() };
        let pos1 = Position::new("mysql-bin.000001", 100);
        let schema1 = delta.apply(&base).unwrap();
        store.append_delta(1, delta, pos1.clone(), schema1).await.unwrap();

        store.compact(1, &pos1).await.unwrap();

        // still resolvable at/after the compaction boundary
        let got = store.get_schema_at(1, &pos1).await.unwrap().unwrap();
        assert!(got.find_database("d").is_some());
    }
}
