//! MySQL Binlog 클라이언트
//!
//! mysql-binlog-connector-java를 참고하여 구현한 Rust binlog 스트리밍 클라이언트.
//! `start_streaming`이 돌려주는 채널은 와이어를 파싱해 얻은 `BinlogEvent`를
//! 실어나르며, `ChannelBinlogSource`로 감싸면 `replicator::BinlogSource`로
//! 그대로 쓸 수 있다.

use crate::auth;
use crate::binlog::BinlogParser;
use crate::connection::ConnectionConfig;
use crate::error::{CdcError, Result};
use crate::events::{BinlogEvent, BinlogEventData, EventType, HeartbeatEventData};
use crate::gtid::GtidSet;
use crate::heartbeat::HEARTBEAT_MARKER_TABLE;
use crate::protocol::{self, GreetingPacket, PacketChannel};
use async_trait::async_trait;
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashMap;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// COM_BINLOG_DUMP 명령어 코드
const COM_BINLOG_DUMP: u8 = 0x12;

/// COM_BINLOG_DUMP_GTID 명령어 코드
const COM_BINLOG_DUMP_GTID: u8 = 0x1e;

/// Binlog 클라이언트
pub struct BinlogClient {
    config: ConnectionConfig,
    binlog_filename: String,
    binlog_position: u64,
    gtid_set: Option<GtidSet>,
}

impl BinlogClient {
    /// 새 Binlog 클라이언트 생성
    pub fn new(config: ConnectionConfig, binlog_filename: String, binlog_position: u64) -> Self {
        BinlogClient { config, binlog_filename, binlog_position, gtid_set: None }
    }

    /// GTID 기반 재개를 위해 실행된 GTID 집합을 실어 보낸다.
    /// `COM_BINLOG_DUMP_GTID`를 통해 서버가 그 집합 이후의 이벤트만 보내게 한다.
    pub fn with_gtid_set(mut self, gtid_set: GtidSet) -> Self {
        self.gtid_set = Some(gtid_set);
        self
    }

    /// Binlog 스트리밍 시작. 돌려준 채널은 파싱된 `BinlogEvent`를 싣는다.
    pub async fn start_streaming(&self) -> Result<mpsc::UnboundedReceiver<BinlogEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();

        info!("starting binlog streaming from {}:{}", self.binlog_filename, self.binlog_position);

        let config = self.config.clone();
        let binlog_filename = self.binlog_filename.clone();
        let binlog_position = self.binlog_position;
        let gtid_set = self.gtid_set.clone();

        tokio::spawn(async move {
            match Self::read_binlog_events(config, binlog_filename, binlog_position, gtid_set, tx).await {
                Ok(_) => info!("binlog streaming ended"),
                Err(e) => error!("binlog streaming error: {e}"),
            }
        });

        Ok(rx)
    }

    /// Binlog 이벤트 읽기: 핸드셰이크/인증/덤프 요청 후 패킷 스트림을
    /// `BinlogEvent`로 파싱해 넘긴다.
    async fn read_binlog_events(
        config: ConnectionConfig,
        binlog_filename: String,
        binlog_position: u64,
        gtid_set: Option<GtidSet>,
        tx: mpsc::UnboundedSender<BinlogEvent>,
    ) -> Result<()> {
        info!("connecting to {}:{}", config.hostname, config.port);

        let mut channel = PacketChannel::connect(&config.hostname, config.port).await?;

        let greeting_packet = channel.read_packet().await?;
        let greeting = GreetingPacket::parse(&greeting_packet)?;

        info!("MySQL server version: {}, thread id: {}", greeting.server_version, greeting.thread_id);

        let auth_response = auth::create_handshake_response(
            &config.username,
            &config.password,
            config.database.as_deref(),
            &greeting.scramble,
            greeting.server_collation,
        )
        .map_err(|e| CdcError::ConnectionError(format!("failed to create auth response: {e}")))?;

        channel.write_packet(&auth_response, 1).await?;

        let auth_result = channel.read_packet().await?;
        if protocol::is_error_packet(&auth_result) {
            return Err(CdcError::ConnectionError("authentication failed".to_string()));
        }
        info!("authentication successful");

        let checksum_query = b"SET @master_binlog_checksum='NONE'";
        let mut query_packet = vec![0x03]; // COM_QUERY
        query_packet.extend_from_slice(checksum_query);
        channel.write_packet(&query_packet, 0).await?;
        let checksum_result = channel.read_packet().await?;
        if protocol::is_error_packet(&checksum_result) {
            warn!("failed to set binlog checksum to NONE, continuing anyway");
        } else {
            info!("binlog checksum set to NONE");
        }

        let dump_command = match &gtid_set {
            Some(gtid_set) => Self::create_binlog_dump_gtid_command(config.server_id, &binlog_filename, binlog_position, gtid_set)?,
            None => Self::create_binlog_dump_command(config.server_id, &binlog_filename, binlog_position)?,
        };
        channel.write_packet(&dump_command, 0).await?;
        info!("sent binlog dump command: file={binlog_filename}, position={binlog_position}, gtid={}", gtid_set.is_some());

        let mut table_names: HashMap<u64, (String, String)> = HashMap::new();
        loop {
            let packet = match channel.read_packet().await {
                Ok(p) => p,
                Err(e) => {
                    error!("failed to read packet: {e}");
                    break;
                }
            };

            if protocol::is_error_packet(&packet) {
                error!("received error packet from server");
                break;
            }
            if !packet.is_empty() && packet[0] == 0xfe && packet.len() < 9 {
                info!("received EOF packet - stream ended");
                break;
            }
            if packet.is_empty() {
                continue;
            }

            let event_data = if packet[0] == 0x00 && packet.len() > 1 { &packet[1..] } else { &packet[..] };

            match Self::parse_event(event_data, &mut table_names) {
                Ok(Some(event)) => {
                    if tx.send(event).is_err() {
                        info!("binlog event receiver dropped, stopping stream");
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("failed to parse binlog event, skipping: {e}"),
            }
        }

        Ok(())
    }

    /// 헤더 + 타입별 바디를 파싱해 `BinlogEvent`로 바꾼다. 하트비트
    /// 마커 테이블에 대한 `WriteRows`는 `Heartbeat`로 재해석한다.
    fn parse_event(data: &[u8], table_names: &mut HashMap<u64, (String, String)>) -> Result<Option<BinlogEvent>> {
        let (header, header_len) = BinlogParser::parse_header(data)?;
        let body = &data[header_len..];

        let event_data = match header.event_type {
            EventType::TableMapEvent => {
                let table_map = BinlogParser::parse_table_map_event(body)?;
                table_names.insert(table_map.table_id, (table_map.database.clone(), table_map.table.clone()));
                BinlogEventData::TableMap(table_map)
            }
            EventType::WriteRowsEvent => {
                let write_rows = BinlogParser::parse_write_rows_event(body)?;
                if Self::is_heartbeat_table(table_names, write_rows.table_id) {
                    match Self::heartbeat_id_from_row(&write_rows.rows) {
                        Some(id) => BinlogEventData::Heartbeat(HeartbeatEventData { heartbeat_id: id }),
                        None => return Ok(None),
                    }
                } else {
                    BinlogEventData::WriteRows(write_rows)
                }
            }
            EventType::UpdateRowsEvent => BinlogEventData::UpdateRows(BinlogParser::parse_update_rows_event(body)?),
            EventType::DeleteRowsEvent => BinlogEventData::DeleteRows(BinlogParser::parse_delete_rows_event(body)?),
            EventType::QueryEvent => BinlogEventData::Query(BinlogParser::parse_query_event(body)?),
            EventType::RotateEvent => BinlogEventData::Rotate(BinlogParser::parse_rotate_event(body)?),
            EventType::GtidEvent | EventType::AnonymousGtidEvent => BinlogEventData::Gtid(BinlogParser::parse_gtid_event(body)?),
            EventType::RowsQueryEvent => BinlogEventData::RowsQuery(String::from_utf8_lossy(body).to_string()),
            _ => BinlogEventData::Unknown(body.to_vec()),
        };

        Ok(Some(BinlogEvent { header, data: event_data }))
    }

    fn is_heartbeat_table(table_names: &HashMap<u64, (String, String)>, table_id: u64) -> bool {
        table_names.get(&table_id).map(|(_, table)| table == HEARTBEAT_MARKER_TABLE).unwrap_or(false)
    }

    /// 마커 테이블의 두 번째 컬럼(heartbeat_id)을 뽑아낸다. 첫 행만 본다 —
    /// 마커 테이블은 항상 단일 행이다.
    fn heartbeat_id_from_row(rows: &[Vec<crate::events::CellValue>]) -> Option<u64> {
        use crate::events::CellValue;
        rows.first()?.get(1).and_then(|cell| match cell {
            CellValue::UInt64(v) => Some(*v),
            CellValue::Int64(v) => Some(*v as u64),
            CellValue::UInt32(v) => Some(*v as u64),
            CellValue::Int32(v) => Some(*v as u64),
            _ => None,
        })
    }

    /// COM_BINLOG_DUMP 명령어 생성
    fn create_binlog_dump_command(server_id: u32, binlog_filename: &str, binlog_position: u64) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.write_u8(COM_BINLOG_DUMP)?;
        buffer.write_u32::<LittleEndian>(binlog_position as u32)?;
        buffer.write_u16::<LittleEndian>(0)?;
        buffer.write_u32::<LittleEndian>(server_id)?;
        buffer.write_all(binlog_filename.as_bytes())?;

        debug!("created COM_BINLOG_DUMP command: server_id={server_id}, file={binlog_filename}, position={binlog_position}");
        Ok(buffer)
    }

    /// COM_BINLOG_DUMP_GTID 명령어 생성: 실행된 GTID 집합을 함께 실어
    /// 보내 서버가 그 집합 이후의 이벤트만 스트리밍하게 한다.
    fn create_binlog_dump_gtid_command(
        server_id: u32,
        binlog_filename: &str,
        binlog_position: u64,
        gtid_set: &GtidSet,
    ) -> Result<Vec<u8>> {
        let gtid_data = Self::encode_gtid_set(gtid_set)?;

        let mut buffer = Vec::new();
        buffer.write_u8(COM_BINLOG_DUMP_GTID)?;
        buffer.write_u16::<LittleEndian>(0)?; // flags
        buffer.write_u32::<LittleEndian>(server_id)?;
        buffer.write_u32::<LittleEndian>(binlog_filename.len() as u32)?;
        buffer.write_all(binlog_filename.as_bytes())?;
        buffer.write_u64::<LittleEndian>(binlog_position)?;
        buffer.write_u32::<LittleEndian>(gtid_data.len() as u32)?;
        buffer.write_all(&gtid_data)?;

        debug!("created COM_BINLOG_DUMP_GTID command: server_id={server_id}, file={binlog_filename}, position={binlog_position}");
        Ok(buffer)
    }

    /// MySQL replication 프로토콜의 GTID 집합 인코딩: n_sids, 그리고 각
    /// SID(16바이트) + n_intervals + (start, end) 쌍들.
    fn encode_gtid_set(gtid_set: &GtidSet) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.write_u64::<LittleEndian>(gtid_set.sets.len() as u64)?;
        for (uuid, set) in &gtid_set.sets {
            let parsed = uuid::Uuid::parse_str(uuid).map_err(|e| CdcError::GtidError(format!("invalid GTID uuid {uuid}: {e}")))?;
            buffer.write_all(parsed.as_bytes())?;
            buffer.write_u64::<LittleEndian>(set.ranges.len() as u64)?;
            for range in &set.ranges {
                buffer.write_u64::<LittleEndian>(range.start)?;
                buffer.write_u64::<LittleEndian>(range.end + 1)?; // protocol intervals are half-open
            }
        }
        Ok(buffer)
    }
}

/// `recovery::HeartbeatLocator`의 실제 구현: 보존된 가장 오래된 binlog
/// 파일부터 순서대로 스캔하며 heartbeat_id를 찾는다. binlog는 순차
/// 스트림이라 임의 접근 탐색이 아니라 선형 스캔이다 — retention window가
/// 짧게 유지된다는 전제로 타당하다 (spec §4.E).
pub struct BinlogHeartbeatLocator {
    config: ConnectionConfig,
}

impl BinlogHeartbeatLocator {
    pub fn new(config: ConnectionConfig) -> Self {
        BinlogHeartbeatLocator { config }
    }
}

#[async_trait]
impl crate::recovery::HeartbeatLocator for BinlogHeartbeatLocator {
    async fn capture_current_position(&self, _server_id: u64) -> Result<crate::position::Position> {
        let mut conn = crate::connection::MySqlConnection::connect(self.config.clone()).await?;
        let status = conn.get_binlog_status().await?;
        let mut position = crate::position::Position::new(status.file, status.position);
        if !status.executed_gtid_set.is_empty() {
            position = position.with_gtid_set(status.executed_gtid_set);
        }
        Ok(position)
    }

    async fn locate(&self, _new_server_id: u64, heartbeat_id: u64) -> Result<Option<crate::position::Position>> {
        let mut conn = crate::connection::MySqlConnection::connect(self.config.clone()).await?;
        let tail = conn.get_binlog_status().await?;
        let files = conn.list_binlog_files().await?;
        let Some(earliest) = files.first().cloned() else {
            return Ok(None);
        };

        let client = BinlogClient::new(self.config.clone(), earliest.clone(), 4);
        let mut rx = client.start_streaming().await?;

        let mut current_file = earliest;
        while let Some(event) = rx.recv().await {
            match &event.data {
                BinlogEventData::Rotate(r) => current_file = r.next_binlog_name.clone(),
                BinlogEventData::Heartbeat(h) if h.heartbeat_id == heartbeat_id => {
                    return Ok(Some(crate::position::Position::new(current_file, event.header.next_pos as u64)));
                }
                _ => {}
            }

            if current_file == tail.file && event.header.next_pos as u64 >= tail.position {
                break;
            }
        }
        Ok(None)
    }
}

/// `BinlogClient::start_streaming`의 채널을 `replicator::BinlogSource`로
/// 바꿔주는 어댑터.
pub struct ChannelBinlogSource {
    rx: mpsc::UnboundedReceiver<BinlogEvent>,
}

impl ChannelBinlogSource {
    pub fn new(rx: mpsc::UnboundedReceiver<BinlogEvent>) -> Self {
        ChannelBinlogSource { rx }
    }
}

#[async_trait]
impl crate::replicator::BinlogSource for ChannelBinlogSource {
    async fn next_event(&mut self) -> Result<Option<BinlogEvent>> {
        Ok(self.rx.recv().await)
    }
}

/// `schema::TableIntrospector`의 실제 구현: 매번 새 연결을 맺고 하나의
/// 테이블 정의만 다시 읽는다. `BinlogHeartbeatLocator`와 같은 이유로
/// 연결을 들고 있지 않는다 — 호출 빈도가 낮고 연결 수명을 단순하게 유지한다.
pub struct MySqlTableIntrospector {
    config: ConnectionConfig,
}

impl MySqlTableIntrospector {
    pub fn new(config: ConnectionConfig) -> Self {
        MySqlTableIntrospector { config }
    }
}

#[async_trait]
impl crate::schema::TableIntrospector for MySqlTableIntrospector {
    async fn introspect_table(&self, database: &str, table: &str) -> Result<crate::schema::Table> {
        let mut conn = crate::connection::MySqlConnection::connect(self.config.clone()).await?;
        let result = crate::schema::introspect::introspect_table(&mut conn, database, table).await;
        conn.close().await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_binlog_dump_command() {
        let cmd = BinlogClient::create_binlog_dump_command(1, "mysql-bin.000001", 4).unwrap();
        assert!(cmd.len() > 11);
        assert_eq!(cmd[0], COM_BINLOG_DUMP);
    }

    #[test]
    fn test_create_binlog_dump_gtid_command() {
        let mut gtid_set = GtidSet::new();
        gtid_set.add_gtid("550e8400-e29b-41d4-a716-446655440000:1-10").unwrap();
        let cmd = BinlogClient::create_binlog_dump_gtid_command(1, "mysql-bin.000001", 4, &gtid_set).unwrap();
        assert_eq!(cmd[0], COM_BINLOG_DUMP_GTID);
    }

    #[test]
    fn heartbeat_table_write_rows_yield_heartbeat_event() {
        use crate::events::CellValue;
        let mut table_names = HashMap::new();
        table_names.insert(7, ("cdc".to_string(), HEARTBEAT_MARKER_TABLE.to_string()));
        let rows = vec![vec![CellValue::UInt32(1), CellValue::UInt64(42)]];
        assert_eq!(BinlogClient::heartbeat_id_from_row(&rows), Some(42));
        assert!(BinlogClient::is_heartbeat_table(&table_names, 7));
    }
}
