//! MySQL binlog CDC 데몬 엔트리포인트: 설정을 읽고, 초기 커서를 해결하고,
//! (선택적으로) HA 리더십을 기다린 뒤 리플리케이션 루프를 돌린다.

use mysql_cdc::binlog_client::{BinlogClient, BinlogHeartbeatLocator, ChannelBinlogSource, MySqlTableIntrospector};
use mysql_cdc::config::ProducerKind;
use mysql_cdc::connection::{ConnectionConfig, MySqlConnection, MySqlHeartbeatSink};
use mysql_cdc::ddl_parser::RegexDdlParser;
use mysql_cdc::ha::{LeaseProvider, LeadershipEvent, SingleNodeLease};
use mysql_cdc::heartbeat::HeartbeatEmitter;
use mysql_cdc::position::store::MySqlPositionStore;
use mysql_cdc::producer::{ChannelProducer, LoggingProducer, Producer};
use mysql_cdc::recovery::RecoveryCoordinator;
use mysql_cdc::replicator::ReplicatorLoop;
use mysql_cdc::schema::store::MySqlSchemaStore;
use mysql_cdc::schema::{capture_schema, SchemaStore};
use mysql_cdc::{CdcError, Config};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// 프로세스 전역 shutdown hook 대신 `main`이 직접 쥐고 있는 명시적 생명주기
/// 핸들 (spec §9 "Global/static state" 재설계). `start`는 Ctrl-C를 감시하는
/// 백그라운드 태스크를 띄우고, 협력자들은 `watch::Receiver`를 복제해 받아
/// 각자 `await`(여기서는 `watch::Receiver::changed`)한다. `stop`은 테스트나
/// 다른 신호원이 같은 경로로 종료를 요청할 수 있게 한다.
struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
}

impl Lifecycle {
    fn start() -> (Self, watch::Receiver<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                let _ = signal_tx.send(true);
            }
        });
        (Lifecycle { shutdown_tx }, shutdown_rx)
    }

    fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(&config.log_level);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config) -> mysql_cdc::Result<()> {
    let upstream_config = ConnectionConfig::from_dsn(&config.upstream_dsn, config.replication_server_id)?;
    let metadata_pool = mysql_async::Pool::new(
        config
            .metadata_dsn
            .parse::<mysql_async::Opts>()
            .map_err(|_| CdcError::ConnectionError(format!("invalid metadata DSN: {}", config.metadata_dsn)))?,
    );
    let upstream_pool = mysql_async::Pool::new(
        config
            .upstream_dsn
            .parse::<mysql_async::Opts>()
            .map_err(|_| CdcError::ConnectionError(format!("invalid upstream DSN: {}", config.upstream_dsn)))?,
    );

    let position_store = Arc::new(MySqlPositionStore::new(metadata_pool.clone()));
    let schema_store = Arc::new(MySqlSchemaStore::new(metadata_pool));
    let locator = Arc::new(BinlogHeartbeatLocator::new(upstream_config.clone()));

    let mut conn = MySqlConnection::connect(upstream_config.clone()).await?;
    let server_id = conn.get_server_id().await? as u64;

    let coordinator = RecoveryCoordinator::new(
        position_store.clone(),
        schema_store.clone(),
        locator,
        config.client_id.clone(),
        config.master_recovery,
    );
    let start_position = coordinator.resolve(server_id).await?;
    info!("resolved starting position: {start_position}");

    let schema = match schema_store.get_schema_at(server_id, &start_position).await? {
        Some(schema) if !config.recapture_schema => schema,
        _ => {
            info!("capturing upstream schema");
            let schema = capture_schema(&mut conn, &[], false).await?;
            schema_store.capture(server_id, &start_position, &schema).await?;
            schema
        }
    };
    conn.close().await?;

    let (lifecycle, shutdown_rx) = Lifecycle::start();

    if config.ha {
        let lease = SingleNodeLease::new();
        let mut events = lease.acquire(&config.client_id).await;
        info!("waiting for HA leadership");
        while let Ok(event) = events.recv().await {
            if event == LeadershipEvent::Acquired {
                info!("leadership acquired, proceeding");
                break;
            }
        }
    }

    let producer: Arc<dyn Producer> = match config.producer {
        ProducerKind::Logging => Arc::new(LoggingProducer),
        ProducerKind::Channel => {
            let (producer, mut rx) = ChannelProducer::new(1024);
            tokio::spawn(async move {
                while let Some(record) = rx.recv().await {
                    info!(target: "producer", "{}", serde_json::to_string(&record).unwrap_or_default());
                }
            });
            Arc::new(producer)
        }
    };

    let heartbeat_sink = Arc::new(MySqlHeartbeatSink::new(upstream_pool));
    let emitter = Arc::new(HeartbeatEmitter::new(heartbeat_sink, config.heartbeat_interval()));
    let heartbeat_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = emitter.run(heartbeat_rx).await {
            error!("heartbeat emitter stopped: {e}");
        }
    });

    let introspector = Arc::new(MySqlTableIntrospector::new(upstream_config.clone()));

    let mut client = BinlogClient::new(upstream_config, start_position.binlog_file.clone(), start_position.offset);
    if config.gtid_mode {
        if let Some(gtid_set) = start_position.gtid_set.clone() {
            client = client.with_gtid_set(gtid_set);
        }
    }
    let rx = client.start_streaming().await?;
    let source = ChannelBinlogSource::new(rx);

    let mut replicator = ReplicatorLoop::new(
        config.client_id,
        server_id,
        start_position,
        schema,
        position_store,
        schema_store,
        Arc::new(RegexDdlParser),
        producer,
        introspector,
    );

    info!("replication loop starting");
    let result = replicator.run(source, shutdown_rx).await;
    lifecycle.stop();
    result
}
