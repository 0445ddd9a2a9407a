//! CDC 관련 에러 타입
//!
//! 타입별 처리 정책은 `ErrorPolicy`로 분류되며, 복구 코디네이터/리플리케이터
//! 최상단에서 한 곳에서만 매핑된다 (예외 기반 제어 흐름을 쓰지 않는다).

use thiserror::Error;

/// 스키마 델타 적용 전제 조건 실패
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaSyncError {
    #[error("database not found: {0}")]
    MissingDatabase(String),

    #[error("table not found: {0}.{1}")]
    MissingTable(String, String),

    #[error("column not found: {0}.{1}.{2}")]
    MissingColumn(String, String, String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("column index out of range: {index} (table has {len} columns)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// 디코드 시점에 선언된 타입과 실제 값이 맞지 않음
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("column cast error: {database}.{table}.{column}: {reason}")]
pub struct ColumnCastError {
    pub database: String,
    pub table: String,
    pub column: String,
    pub reason: String,
}

/// DDL 파서가 인식하지 못한 구문
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to parse DDL statement: {0}")]
pub struct ParseError(pub String);

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("MySQL 연결 에러: {0}")]
    ConnectionError(String),

    #[error("connection lost: {0}")]
    ConnectLost(String),

    #[error("binlog retention lost, position no longer available: {0}")]
    BinlogRetentionLost(String),

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("프로토콜 에러: {0}")]
    ProtocolError(String),

    #[error("유효하지 않은 이벤트: {0}")]
    InvalidEvent(String),

    #[error("GTID 처리 에러: {0}")]
    GtidError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error(transparent)]
    SchemaSync(#[from] SchemaSyncError),

    #[error(transparent)]
    ColumnCast(#[from] ColumnCastError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("producer error: {0}")]
    ProducerError(String),

    #[error("leadership lost")]
    LeadershipLost,

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Timeout 에러")]
    Timeout,

    #[error("예상치 못한 에러: {0}")]
    Other(String),
}

impl From<std::io::Error> for CdcError {
    fn from(e: std::io::Error) -> Self {
        CdcError::IoError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

/// §7 handling policy for a given error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// exponential backoff reconnect up to a bound, then terminate
    RetryThenTerminate,
    /// terminate with exit code 2, retention lost is unrecoverable
    TerminateRetentionLost,
    /// terminate; operator must recapture the schema
    TerminateFatal,
    /// skip with a warning (whitelisted patterns) or terminate
    SkipOrTerminate,
    /// terminate cleanly, the process may be restarted
    TerminateClean,
}

impl CdcError {
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            CdcError::ConnectLost(_) | CdcError::ConnectionError(_) | CdcError::Timeout => {
                ErrorPolicy::RetryThenTerminate
            }
            CdcError::BinlogRetentionLost(_) => ErrorPolicy::TerminateRetentionLost,
            CdcError::SchemaSync(_) | CdcError::ColumnCast(_) => ErrorPolicy::TerminateFatal,
            CdcError::Parse(_) => ErrorPolicy::SkipOrTerminate,
            CdcError::ProducerError(_) => ErrorPolicy::RetryThenTerminate,
            CdcError::LeadershipLost => ErrorPolicy::TerminateClean,
            _ => ErrorPolicy::TerminateFatal,
        }
    }

    /// process exit code for an error that reaches `main` unhandled.
    pub fn exit_code(&self) -> i32 {
        match self.policy() {
            ErrorPolicy::TerminateRetentionLost => 2,
            ErrorPolicy::TerminateClean => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_lost_is_exit_code_2() {
        let err = CdcError::BinlogRetentionLost("mysql-bin.000001".to_string());
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.policy(), ErrorPolicy::TerminateRetentionLost);
    }

    #[test]
    fn schema_sync_is_fatal() {
        let err: CdcError = SchemaSyncError::MissingDatabase("d".to_string()).into();
        assert_eq!(err.policy(), ErrorPolicy::TerminateFatal);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn leadership_lost_is_clean_exit() {
        assert_eq!(CdcError::LeadershipLost.exit_code(), 0);
    }
}
