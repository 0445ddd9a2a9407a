//! 정규 변경 레코드: 프로듀서로 나가는 application-level 뷰.
//!
//! `events::BinlogEvent`/`CellValue`가 binlog 와이어 포맷이라면, `Record`는
//! 스키마 추적기를 거쳐 컬럼명으로 키잉된 디코드 결과다 (spec §8.3).

use crate::position::Position;
use crate::schema::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Insert,
    Update,
    Delete,
    Ddl,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Insert => "insert",
            Op::Update => "update",
            Op::Delete => "delete",
            Op::Ddl => "ddl",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub position: Position,
    pub op: Op,
    pub database: String,
    pub table: String,
    pub before: Option<HashMap<String, Value>>,
    pub after: Option<HashMap<String, Value>>,
    pub query: Option<String>,
}

impl Record {
    pub fn insert(position: Position, database: String, table: String, after: HashMap<String, Value>) -> Self {
        Record {
            position,
            op: Op::Insert,
            database,
            table,
            before: None,
            after: Some(after),
            query: None,
        }
    }

    pub fn update(
        position: Position,
        database: String,
        table: String,
        before: HashMap<String, Value>,
        after: HashMap<String, Value>,
    ) -> Self {
        Record {
            position,
            op: Op::Update,
            database,
            table,
            before: Some(before),
            after: Some(after),
            query: None,
        }
    }

    pub fn delete(position: Position, database: String, table: String, before: HashMap<String, Value>) -> Self {
        Record {
            position,
            op: Op::Delete,
            database,
            table,
            before: Some(before),
            after: None,
            query: None,
        }
    }

    pub fn ddl(position: Position, database: String, query: String) -> Self {
        Record {
            position,
            op: Op::Ddl,
            database,
            table: String::new(),
            before: None,
            after: None,
            query: Some(query),
        }
    }
}
