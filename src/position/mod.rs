//! 영속 커서: Position, RecoveryInfo, PositionStore.

pub mod store;

use crate::gtid::GtidSet;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub use store::PositionStore;

/// 리플리케이션 커서. GTID 모드일 때는 GTID 집합 포함 관계로, 아닐 때는
/// `(file, offset)`의 사전식 순서로 전체 순서를 갖는다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub binlog_file: String,
    pub offset: u64,
    pub gtid_set: Option<GtidSet>,
    pub heartbeat_id: Option<u64>,
}

impl Position {
    pub fn new(binlog_file: impl Into<String>, offset: u64) -> Self {
        Position {
            binlog_file: binlog_file.into(),
            offset,
            gtid_set: None,
            heartbeat_id: None,
        }
    }

    pub fn with_gtid_set(mut self, gtid_set: GtidSet) -> Self {
        self.gtid_set = Some(gtid_set);
        self
    }

    pub fn with_heartbeat_id(mut self, id: u64) -> Self {
        self.heartbeat_id = Some(id);
        self
    }

    fn file_sequence(&self) -> Option<u64> {
        self.binlog_file.split('.').last().and_then(|s| s.parse().ok())
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.gtid_set, &other.gtid_set) {
            (Some(a), Some(b)) => gtid_set_order(a, b),
            _ => match self.file_sequence().cmp(&other.file_sequence()) {
                Ordering::Equal => self.offset.cmp(&other.offset),
                ord => ord,
            },
        }
    }
}

/// GTID 집합 사이의 "포함" 기반 전체 순서: a가 b의 부분집합이면 a <= b.
/// 둘 다 서로를 포함하지 않는(동시에 발생할 수 없는 리플리케이션 스트림
/// 상에서는 일어나지 않아야 하는) 경우는 바이트 표현 비교로 동점 처리한다.
fn gtid_set_order(a: &GtidSet, b: &GtidSet) -> Ordering {
    let a_str = a.to_string();
    let b_str = b.to_string();
    if a_str == b_str {
        return Ordering::Equal;
    }
    let a_subset = a.subtract(b).is_empty();
    let b_subset = b.subtract(a).is_empty();
    match (a_subset, b_subset) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a_str.cmp(&b_str),
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.binlog_file, self.offset)?;
        if let Some(h) = self.heartbeat_id {
            write!(f, " (heartbeat {h})")?;
        }
        Ok(())
    }
}

/// 업스트림 프라이머리가 교체된 후 후속 프로세스가 재개 지점을 찾을 수
/// 있도록 포지션 스토어가 기록하는 튜플.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryInfo {
    pub server_id: u64,
    pub position: Position,
    pub last_heartbeat_id: u64,
    pub client_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicographic_order_without_gtid() {
        let a = Position::new("mysql-bin.000001", 100);
        let b = Position::new("mysql-bin.000001", 200);
        assert!(a < b);

        let c = Position::new("mysql-bin.000002", 0);
        assert!(b < c);
    }

    #[test]
    fn position_monotonicity_sequence() {
        let positions = vec![
            Position::new("mysql-bin.000001", 4),
            Position::new("mysql-bin.000001", 500),
            Position::new("mysql-bin.000002", 4),
        ];
        for w in positions.windows(2) {
            assert!(w[1] > w[0]);
        }
    }
}
