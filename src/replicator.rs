//! 리플리케이터 루프: binlog 이벤트 스트림을 정규 레코드로 바꿔 프로듀서로
//! 내보내고, 포지션과 스키마 스냅샷을 전진시킨다 (spec §4.F state machine).
//!
//! `INIT -> RUNNING -> (FAILED | STOPPING -> STOPPED)`. 종료 신호가 오면
//! 새 이벤트를 더 읽지 않고 지금까지 내보낸 레코드를 플러시한 뒤 멈춘다 —
//! binlog client -> replicator -> producer -> schema store 순의 역의존성
//! 드레이닝(spec §5)이다.

use crate::ddl_parser::DdlParser;
use crate::decode::decode_row;
use crate::error::{CdcError, ColumnCastError, ErrorPolicy, Result};
use crate::events::{BinlogEvent, BinlogEventData, HeartbeatEventData, QueryEventData};
use crate::position::{Position, PositionStore, RecoveryInfo};
use crate::producer::Producer;
use crate::record::Record;
use crate::schema::{Database, Schema, SchemaStore, Table, TableIntrospector};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// `RetryThenTerminate` 정책의 재시도 상한. 초과하면 원래 에러로 종료한다.
const MAX_RETRY_ATTEMPTS: u32 = 5;

/// 리플리케이터가 소비하는, 와이어 프로토콜에 구애받지 않는 이벤트 소스.
/// `binlog_client::BinlogClient`가 실제 구현을 제공한다.
#[async_trait]
pub trait BinlogSource: Send {
    /// 업스트림이 연결을 닫으면 `None`을 돌려준다.
    async fn next_event(&mut self) -> Result<Option<BinlogEvent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    Init,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// 하나의 업스트림 서버 정체성에 대한 리플리케이션 루프. 테이블 맵 캐시,
/// 현재 추적 중인 스키마 스냅샷, 커밋 대상 협력자들을 들고 있는다.
pub struct ReplicatorLoop {
    client_id: String,
    server_id: u64,
    current_file: String,
    schema: Schema,
    table_map: HashMap<u64, (String, String)>,
    position_store: Arc<dyn PositionStore>,
    schema_store: Arc<dyn SchemaStore>,
    ddl_parser: Arc<dyn DdlParser>,
    producer: Arc<dyn Producer>,
    introspector: Arc<dyn TableIntrospector>,
    state: ReplicatorState,
}

impl ReplicatorLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: impl Into<String>,
        server_id: u64,
        start: Position,
        schema: Schema,
        position_store: Arc<dyn PositionStore>,
        schema_store: Arc<dyn SchemaStore>,
        ddl_parser: Arc<dyn DdlParser>,
        producer: Arc<dyn Producer>,
        introspector: Arc<dyn TableIntrospector>,
    ) -> Self {
        ReplicatorLoop {
            client_id: client_id.into(),
            server_id,
            current_file: start.binlog_file,
            schema,
            table_map: HashMap::new(),
            position_store,
            schema_store,
            ddl_parser,
            producer,
            introspector,
            state: ReplicatorState::Init,
        }
    }

    pub fn state(&self) -> ReplicatorState {
        self.state
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// 종료 신호가 올 때까지, 혹은 복구 불가 에러를 만날 때까지 이벤트를
    /// 소비한다. 정상 종료는 `Ok(())`를 돌려준다 — 에러 정책 매핑과 프로세스
    /// 종료 코드는 호출자(`main.rs`)의 몫이다.
    pub async fn run<S: BinlogSource>(&mut self, mut source: S, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.state = ReplicatorState::Running;
        loop {
            tokio::select! {
                event = source.next_event() => {
                    match event {
                        Ok(Some(event)) => {
                            if let Some(e) = self.dispatch(event).await {
                                return self.terminate(e);
                            }
                        }
                        Ok(None) => {
                            info!("binlog source exhausted, stopping");
                            break;
                        }
                        Err(e) => return self.terminate(e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown requested, draining");
                        self.state = ReplicatorState::Stopping;
                        break;
                    }
                }
            }
        }

        self.producer.flush().await?;
        self.state = ReplicatorState::Stopped;
        Ok(())
    }

    /// 단일 이벤트에 대한 `CdcError::policy()` 매핑 지점 (spec §7/§9 — 정책
    /// 분류는 여기 한 곳에서만 일어난다). `SkipOrTerminate`는 경고를 남기고
    /// 다음 이벤트로 넘어가며, `RetryThenTerminate`는 바운드된 지수
    /// 백오프로 같은 이벤트를 재시도한다. 나머지 정책은 호출자가 종료하도록
    /// 에러를 돌려준다. 루프를 계속 돌 수 있으면 `None`을 돌려준다.
    async fn dispatch(&mut self, event: BinlogEvent) -> Option<CdcError> {
        let mut attempt = 0u32;
        loop {
            match self.handle_event(event.clone()).await {
                Ok(()) => return None,
                Err(e) => match e.policy() {
                    ErrorPolicy::SkipOrTerminate => {
                        warn!("skipping event after unrecoverable parse error: {e}");
                        return None;
                    }
                    ErrorPolicy::RetryThenTerminate if attempt < MAX_RETRY_ATTEMPTS => {
                        attempt += 1;
                        let backoff = Duration::from_millis(100 * 2u64.pow(attempt.min(6)));
                        warn!("retrying after error (attempt {attempt}/{MAX_RETRY_ATTEMPTS}): {e}, backing off {backoff:?}");
                        tokio::time::sleep(backoff).await;
                    }
                    _ => return Some(e),
                },
            }
        }
    }

    fn terminate(&mut self, e: CdcError) -> Result<()> {
        match e.policy() {
            ErrorPolicy::TerminateClean => {
                self.state = ReplicatorState::Stopped;
                Ok(())
            }
            _ => {
                self.state = ReplicatorState::Failed;
                Err(e)
            }
        }
    }

    fn position_at(&self, header_next_pos: u32) -> Position {
        Position::new(self.current_file.clone(), header_next_pos as u64)
    }

    fn table_for(&self, table_id: u64) -> Result<(String, String)> {
        self.table_map
            .get(&table_id)
            .cloned()
            .ok_or_else(|| CdcError::InvalidEvent(format!("row event for untracked table_id {table_id}")))
    }

    fn resolve_table(&self, database: &str, table: &str) -> Result<&Table> {
        let db = self
            .schema
            .find_database(database)
            .ok_or_else(|| CdcError::InvalidEvent(format!("row event for untracked database {database}")))?;
        db.find_table(table, self.schema.case_sensitive)
            .ok_or_else(|| CdcError::InvalidEvent(format!("row event for untracked table {database}.{table}")))
    }

    async fn handle_event(&mut self, event: BinlogEvent) -> Result<()> {
        let position = self.position_at(event.header.next_pos);
        match event.data {
            BinlogEventData::TableMap(data) => {
                self.table_map.insert(data.table_id, (data.database, data.table));
                Ok(())
            }
            BinlogEventData::WriteRows(data) => {
                let (database, table) = self.table_for(data.table_id)?;
                for row in &data.rows {
                    let table_def = self.resolve_table(&database, &table)?.clone();
                    let after = match decode_row(&table_def, &database, row) {
                        Ok(v) => v,
                        Err(e) => return Err(self.diagnose_column_cast(&database, &table, &table_def, e).await),
                    };
                    self.producer
                        .enqueue(Record::insert(position.clone(), database.clone(), table.clone(), after))
                        .await?;
                }
                Ok(())
            }
            BinlogEventData::UpdateRows(data) => {
                let (database, table) = self.table_for(data.table_id)?;
                for (before_row, after_row) in &data.rows {
                    let table_def = self.resolve_table(&database, &table)?.clone();
                    let before = match decode_row(&table_def, &database, before_row) {
                        Ok(v) => v,
                        Err(e) => return Err(self.diagnose_column_cast(&database, &table, &table_def, e).await),
                    };
                    let after = match decode_row(&table_def, &database, after_row) {
                        Ok(v) => v,
                        Err(e) => return Err(self.diagnose_column_cast(&database, &table, &table_def, e).await),
                    };
                    self.producer
                        .enqueue(Record::update(position.clone(), database.clone(), table.clone(), before, after))
                        .await?;
                }
                Ok(())
            }
            BinlogEventData::DeleteRows(data) => {
                let (database, table) = self.table_for(data.table_id)?;
                for row in &data.rows {
                    let table_def = self.resolve_table(&database, &table)?.clone();
                    let before = match decode_row(&table_def, &database, row) {
                        Ok(v) => v,
                        Err(e) => return Err(self.diagnose_column_cast(&database, &table, &table_def, e).await),
                    };
                    self.producer
                        .enqueue(Record::delete(position.clone(), database.clone(), table.clone(), before))
                        .await?;
                }
                Ok(())
            }
            BinlogEventData::Query(data) => self.handle_query(data, position).await,
            BinlogEventData::Rotate(data) => {
                info!("rotating from {} to {}", self.current_file, data.next_binlog_name);
                self.current_file = data.next_binlog_name;
                Ok(())
            }
            BinlogEventData::Gtid(data) => {
                debug!("observed gtid {}", data.gtid);
                Ok(())
            }
            BinlogEventData::Heartbeat(data) => self.handle_heartbeat(data, position).await,
            BinlogEventData::Xid(_) => self.commit_position(position).await,
            BinlogEventData::RowsQuery(_) | BinlogEventData::Unknown(_) => Ok(()),
        }
    }

    /// DDL 쿼리 이벤트: 파싱 -> 델타 적용 -> 영속화 -> 포인터 스왑. 스토어
    /// 쓰기와 인메모리 스왑이 모두 성공해야만 다음 델타로 넘어간다 — 중간에
    /// 실패하면 추적 중인 스키마는 마지막으로 확정된 델타에 머무른다.
    async fn handle_query(&mut self, data: QueryEventData, position: Position) -> Result<()> {
        let trimmed = data.query.trim();
        if trimmed.eq_ignore_ascii_case("BEGIN") || trimmed.eq_ignore_ascii_case("COMMIT") {
            return Ok(());
        }

        let deltas = self.ddl_parser.parse(&data.query, &data.database, &self.schema)?;
        for delta in deltas {
            let next_schema = delta.apply(&self.schema)?;
            self.schema_store
                .append_delta(self.server_id, delta, position.clone(), next_schema.clone())
                .await?;
            self.schema = next_schema;
        }

        self.producer
            .enqueue(Record::ddl(position.clone(), data.database, data.query))
            .await?;
        self.commit_position(position).await
    }

    /// 하트비트 관측: 포지션을 커밋하고, 다른 서버 정체성에서의 마스터
    /// 복구를 위한 recovery info를 남긴다 (spec §4.E/§4.H).
    async fn handle_heartbeat(&mut self, data: HeartbeatEventData, position: Position) -> Result<()> {
        let position = position.with_heartbeat_id(data.heartbeat_id);
        self.position_store
            .record_heartbeat(RecoveryInfo {
                server_id: self.server_id,
                position: position.clone(),
                last_heartbeat_id: data.heartbeat_id,
                client_id: self.client_id.clone(),
            })
            .await?;
        self.commit_position(position).await
    }

    async fn commit_position(&self, position: Position) -> Result<()> {
        self.position_store.set(&self.client_id, self.server_id, position).await
    }

    /// `ColumnCastError`를 받으면 바로 올리지 않고, 라이브 업스트림 테이블을
    /// 다시 읽어 추적 중인 정의와 `diff`해 모든 divergence를 로그에 남긴다
    /// (spec §4.F/§7 — 이 함수는 로깅만 하고, 원래 에러는 그대로 돌려줘
    /// 호출자가 종료하도록 한다).
    async fn diagnose_column_cast(
        &self,
        database: &str,
        table: &str,
        tracked: &Table,
        err: ColumnCastError,
    ) -> CdcError {
        match self.introspector.introspect_table(database, table).await {
            Ok(live) => {
                let mut diff = Vec::new();
                let tracked_schema =
                    Schema::empty(self.schema.case_sensitive).push_database(Database::new(database).push_table(tracked.clone()));
                let live_schema =
                    Schema::empty(self.schema.case_sensitive).push_database(Database::new(database).push_table(live));
                tracked_schema.diff(&live_schema, &mut diff, "tracked", "upstream");
                if diff.is_empty() {
                    error!("column cast error with no detectable schema divergence: {err}");
                } else {
                    for line in &diff {
                        error!("schema divergence for {database}.{table}: {line}");
                    }
                }
            }
            Err(introspect_err) => {
                error!("failed to re-introspect {database}.{table} after column cast error: {introspect_err}");
            }
        }
        CdcError::ColumnCast(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl_parser::RegexDdlParser;
    use crate::events::{CellValue, EventHeader, EventType, RotateEventData, TableMapData, WriteRowsData};
    use crate::position::PositionStore;
    use crate::position::store::InMemoryPositionStore;
    use crate::producer::ChannelProducer;
    use crate::schema::store::InMemorySchemaStore;
    use crate::schema::{Charset, Column, ColumnType, Database};
    use std::collections::VecDeque;

    struct QueueSource {
        events: VecDeque<BinlogEvent>,
    }

    impl QueueSource {
        fn new(events: Vec<BinlogEvent>) -> Self {
            QueueSource { events: events.into() }
        }
    }

    #[async_trait]
    impl BinlogSource for QueueSource {
        async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
            Ok(self.events.pop_front())
        }
    }

    /// 호출되지 않으리라 기대하는 테스트용 스텁. 만약 호출되면 에러로
    /// 드러나도록 `Other`를 돌려준다.
    struct UnreachableIntrospector;

    #[async_trait]
    impl TableIntrospector for UnreachableIntrospector {
        async fn introspect_table(&self, database: &str, table: &str) -> Result<Table> {
            Err(CdcError::Other(format!("unexpected introspection of {database}.{table}")))
        }
    }

    /// 고정된 "라이브" 테이블 정의를 돌려주는 테스트용 introspector. S5
    /// (컬럼 캐스트 불일치) 시나리오를 구동한다.
    struct FixedIntrospector {
        live: Table,
    }

    #[async_trait]
    impl TableIntrospector for FixedIntrospector {
        async fn introspect_table(&self, _database: &str, _table: &str) -> Result<Table> {
            Ok(self.live.clone())
        }
    }

    fn header(next_pos: u32, event_type: EventType) -> EventHeader {
        EventHeader { timestamp: 0, event_type, server_id: 1, event_length: 0, next_pos, flags: 0 }
    }

    fn users_schema() -> Schema {
        let table = Table {
            name: "users".to_string(),
            columns: vec![Column {
                name: "id".to_string(),
                column_type: ColumnType::Int { width: 32, unsigned: false },
                nullable: false,
            }],
            charset: Charset::default(),
        };
        Schema::empty(false).push_database(Database::new("shop").push_table(table))
    }

    fn loop_with(schema: Schema) -> (ReplicatorLoop, Arc<InMemoryPositionStore>, tokio::sync::mpsc::Receiver<Record>) {
        loop_with_introspector(schema, Arc::new(UnreachableIntrospector))
    }

    fn loop_with_introspector(
        schema: Schema,
        introspector: Arc<dyn TableIntrospector>,
    ) -> (ReplicatorLoop, Arc<InMemoryPositionStore>, tokio::sync::mpsc::Receiver<Record>) {
        let position_store = Arc::new(InMemoryPositionStore::new());
        let schema_store = Arc::new(InMemorySchemaStore::new());
        let (producer, rx) = ChannelProducer::new(16);
        let replicator = ReplicatorLoop::new(
            "client-a",
            1,
            Position::new("mysql-bin.000001", 0),
            schema,
            position_store.clone(),
            schema_store,
            Arc::new(RegexDdlParser),
            Arc::new(producer),
            introspector,
        );
        (replicator, position_store, rx)
    }

    #[tokio::test]
    async fn write_rows_emit_insert_and_commit_position_on_xid() {
        let (mut replicator, position_store, mut rx) = loop_with(users_schema());
        let events = vec![
            BinlogEvent {
                header: header(100, EventType::TableMapEvent),
                data: BinlogEventData::TableMap(TableMapData {
                    table_id: 7,
                    database: "shop".to_string(),
                    table: "users".to_string(),
                    column_types: vec![],
                    column_meta: vec![],
                    nullable_bitmap: vec![],
                }),
            },
            BinlogEvent {
                header: header(150, EventType::WriteRowsEvent),
                data: BinlogEventData::WriteRows(WriteRowsData {
                    table_id: 7,
                    flags: 0,
                    column_count: 1,
                    columns_present: vec![],
                    rows: vec![vec![CellValue::Int32(1)]],
                }),
            },
            BinlogEvent { header: header(160, EventType::Unknown), data: BinlogEventData::Xid(42) },
        ];

        let (_tx, shutdown) = watch::channel(false);
        replicator.run(QueueSource::new(events), shutdown).await.unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.op, crate::record::Op::Insert);
        assert_eq!(record.table, "users");

        let committed = position_store.get_current("client-a", 1).await.unwrap().unwrap();
        assert_eq!(committed.offset, 160);
        assert_eq!(replicator.state(), ReplicatorState::Stopped);
    }

    #[tokio::test]
    async fn create_table_ddl_updates_tracked_schema_and_emits_ddl_record() {
        let (mut replicator, _position_store, mut rx) = loop_with(Schema::empty(false));
        let events = vec![BinlogEvent {
            header: header(200, EventType::QueryEvent),
            data: BinlogEventData::Query(QueryEventData {
                thread_id: 1,
                exec_time: 0,
                database: "shop".to_string(),
                query: "CREATE TABLE users (id INT)".to_string(),
            }),
        }];

        let (_tx, shutdown) = watch::channel(false);
        replicator.run(QueueSource::new(events), shutdown).await.unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.op, crate::record::Op::Ddl);
        assert!(replicator.schema().find_database("shop").unwrap().find_table("users", false).is_some());
    }

    #[tokio::test]
    async fn rotate_event_switches_current_binlog_file() {
        let (mut replicator, _position_store, _rx) = loop_with(users_schema());
        let events = vec![BinlogEvent {
            header: header(4, EventType::RotateEvent),
            data: BinlogEventData::Rotate(RotateEventData { next_binlog_name: "mysql-bin.000002".to_string(), position: 4 }),
        }];

        let (_tx, shutdown) = watch::channel(false);
        replicator.run(QueueSource::new(events), shutdown).await.unwrap();
        assert_eq!(replicator.current_file, "mysql-bin.000002");
    }

    #[tokio::test]
    async fn row_event_for_untracked_table_is_an_invalid_event_error() {
        let (mut replicator, _position_store, _rx) = loop_with(users_schema());
        let events = vec![BinlogEvent {
            header: header(100, EventType::WriteRowsEvent),
            data: BinlogEventData::WriteRows(WriteRowsData {
                table_id: 99,
                flags: 0,
                column_count: 1,
                columns_present: vec![],
                rows: vec![vec![CellValue::Int32(1)]],
            }),
        }];

        let (_tx, shutdown) = watch::channel(false);
        let err = replicator.run(QueueSource::new(events), shutdown).await.unwrap_err();
        assert!(matches!(err, CdcError::InvalidEvent(_)));
        assert_eq!(replicator.state(), ReplicatorState::Failed);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop_without_draining_further_events() {
        let (mut replicator, _position_store, _rx) = loop_with(users_schema());
        let (tx, shutdown) = watch::channel(false);
        tx.send(true).unwrap();
        replicator.run(QueueSource::new(vec![]), shutdown).await.unwrap();
        assert_eq!(replicator.state(), ReplicatorState::Stopped);
    }

    fn retyped_users_table() -> Table {
        Table {
            name: "users".to_string(),
            columns: vec![Column {
                name: "id".to_string(),
                column_type: ColumnType::VarString { length: 36, charset: Charset::default() },
                nullable: false,
            }],
            charset: Charset::default(),
        }
    }

    /// S5: 디코드 중 추적 정의와 실제 값이 어긋나면, 라이브 테이블을 다시
    /// 읽어 divergence를 찾아내고 `ColumnCastError`로 종료해야 한다.
    #[tokio::test]
    async fn column_cast_error_reintrospects_and_terminates_with_column_cast_error() {
        let introspector = Arc::new(FixedIntrospector { live: retyped_users_table() });
        let (mut replicator, _position_store, _rx) = loop_with_introspector(users_schema(), introspector);

        let events = vec![
            BinlogEvent {
                header: header(100, EventType::TableMapEvent),
                data: BinlogEventData::TableMap(TableMapData {
                    table_id: 7,
                    database: "shop".to_string(),
                    table: "users".to_string(),
                    column_types: vec![],
                    column_meta: vec![],
                    nullable_bitmap: vec![],
                }),
            },
            BinlogEvent {
                header: header(150, EventType::WriteRowsEvent),
                data: BinlogEventData::WriteRows(WriteRowsData {
                    table_id: 7,
                    flags: 0,
                    column_count: 1,
                    columns_present: vec![],
                    rows: vec![vec![CellValue::Bytes(vec![0xff, 0xfe])]],
                }),
            },
        ];

        let (_tx, shutdown) = watch::channel(false);
        let err = replicator.run(QueueSource::new(events), shutdown).await.unwrap_err();
        assert!(matches!(err, CdcError::ColumnCast(_)));
        assert_eq!(replicator.state(), ReplicatorState::Failed);
    }

    /// The divergence log line produced on a cast mismatch must name the
    /// changed column, not just report that something differs.
    #[test]
    fn reintrospection_diff_names_the_changed_column() {
        let tracked_table = users_schema()
            .find_database("shop")
            .unwrap()
            .find_table("users", false)
            .unwrap()
            .clone();
        let tracked_schema = Schema::empty(false).push_database(Database::new("shop").push_table(tracked_table));
        let live_schema = Schema::empty(false).push_database(Database::new("shop").push_table(retyped_users_table()));

        let mut diff = Vec::new();
        tracked_schema.diff(&live_schema, &mut diff, "tracked", "upstream");

        assert!(diff.iter().any(|line| line.contains("shop.users.id") && line.contains("type")));
    }
}
