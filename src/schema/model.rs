//! 스키마 모델: 데이터베이스 카탈로그의 인메모리 미러
//!
//! `Schema`는 구조적 공유(Arc)를 사용하는 거의-불변 스냅샷이다. 델타 적용은
//! `copy() + 한 군데만 변경`으로 이루어지므로 `copy`가 핫 패스이며, 여기서
//! 복사하는 비용은 바뀌지 않는 하위 구조를 공유하는 것으로 상쇄된다.

use crate::error::{ColumnCastError, SchemaSyncError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 문자 인코딩. 컬럼/테이블 모두에 붙는다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charset(pub String);

impl Default for Charset {
    fn default() -> Self {
        Charset("utf8mb4".to_string())
    }
}

/// MySQL 컬럼 타입의 태그된 변형.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    Int { width: u8, unsigned: bool },
    Decimal { precision: u16, scale: u16 },
    VarString { length: u32, charset: Charset },
    Blob { length: u64, charset: Option<Charset> },
    Enum { values: Vec<String> },
    Set { values: Vec<String> },
    Temporal { kind: TemporalKind, fsp: u8 },
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalKind {
    Date,
    Time,
    DateTime,
    Timestamp,
    Year,
}

/// 디코드된 정규 값.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Temporal(String),
    Json(serde_json::Value),
}

impl ColumnType {
    /// raw 바이트를 이 타입의 규약에 따라 정규 값으로 디코드한다.
    ///
    /// `database`/`table`/`column`은 오직 실패 시 `ColumnCastError`에 실어
    /// 보낼 문맥 용도다.
    pub fn decode(
        &self,
        raw: &crate::events::CellValue,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<Value, ColumnCastError> {
        use crate::events::CellValue as C;

        let mismatch = |reason: &str| ColumnCastError {
            database: database.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            reason: reason.to_string(),
        };

        match (self, raw) {
            (_, C::Null) => Ok(Value::Null),
            (ColumnType::Int { unsigned, .. }, C::Int8(v)) => Ok(signed_or_unsigned(*v as i64, *unsigned)),
            (ColumnType::Int { unsigned, .. }, C::Int16(v)) => Ok(signed_or_unsigned(*v as i64, *unsigned)),
            (ColumnType::Int { unsigned, .. }, C::Int32(v)) => Ok(signed_or_unsigned(*v as i64, *unsigned)),
            (ColumnType::Int { unsigned, .. }, C::Int64(v)) => Ok(signed_or_unsigned(*v, *unsigned)),
            (ColumnType::Int { .. }, C::UInt8(v)) => Ok(Value::UInt(*v as u64)),
            (ColumnType::Int { .. }, C::UInt16(v)) => Ok(Value::UInt(*v as u64)),
            (ColumnType::Int { .. }, C::UInt32(v)) => Ok(Value::UInt(*v as u64)),
            (ColumnType::Int { .. }, C::UInt64(v)) => Ok(Value::UInt(*v)),
            (ColumnType::Decimal { .. }, C::Decimal(s)) => Ok(Value::Decimal(s.clone())),
            (ColumnType::Decimal { .. }, C::String(s)) => Ok(Value::Decimal(s.clone())),
            (ColumnType::VarString { .. }, C::String(s)) => Ok(Value::String(s.clone())),
            (ColumnType::VarString { .. }, C::Bytes(b)) => String::from_utf8(b.clone())
                .map(Value::String)
                .map_err(|_| mismatch("non-UTF8 bytes for string column")),
            (ColumnType::Blob { .. }, C::Bytes(b)) => Ok(Value::Bytes(b.clone())),
            (ColumnType::Blob { .. }, C::String(s)) => Ok(Value::Bytes(s.clone().into_bytes())),
            (ColumnType::Enum { values }, C::UInt8(idx)) => values
                .get((*idx as usize).wrapping_sub(1))
                .cloned()
                .map(Value::String)
                .ok_or_else(|| mismatch("enum index out of range")),
            (ColumnType::Enum { .. }, C::String(s)) => Ok(Value::String(s.clone())),
            (ColumnType::Set { .. }, C::String(s)) => Ok(Value::String(s.clone())),
            (ColumnType::Temporal { .. }, C::DateTime(dt)) => Ok(Value::Temporal(dt.to_rfc3339())),
            (ColumnType::Temporal { .. }, C::Date(s)) => Ok(Value::Temporal(s.clone())),
            (ColumnType::Temporal { .. }, C::Time(s)) => Ok(Value::Temporal(s.clone())),
            (ColumnType::Json, C::Json(j)) => Ok(Value::Json(j.clone())),
            (ColumnType::Json, C::String(s)) => serde_json::from_str(s)
                .map(Value::Json)
                .map_err(|e| mismatch(&format!("invalid JSON: {e}"))),
            (expected, got) => Err(mismatch(&format!(
                "expected a value compatible with {expected:?}, got {got:?}"
            ))),
        }
    }

    /// 인간이 읽을 수 있는 타입 변경 설명. 로깅/진단 용도.
    pub fn diff(&self, other: &ColumnType) -> Option<String> {
        if self == other {
            None
        } else {
            Some(format!("{self:?} -> {other:?}"))
        }
    }
}

fn signed_or_unsigned(v: i64, unsigned: bool) -> Value {
    if unsigned {
        Value::UInt(v as u64)
    } else {
        Value::Int(v)
    }
}

/// 단일 컬럼 정의. 위치(`ordinal`)가 binlog 행 이미지와 짝짓는 정체성이다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// 테이블: 순서가 있는 컬럼 시퀀스 + 인코딩.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub charset: Charset,
}

impl Table {
    pub fn find_column_index(&self, name: &str, case_sensitive: bool) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| names_eq(&c.name, name, case_sensitive))
    }

    pub fn column_at(&self, ordinal: usize) -> Option<&Column> {
        self.columns.get(ordinal)
    }

    pub(crate) fn with_column_inserted(mut self, index: usize, column: Column) -> Table {
        self.columns.insert(index.min(self.columns.len()), column);
        self
    }

    pub(crate) fn with_column_removed(mut self, index: usize) -> Table {
        self.columns.remove(index);
        self
    }

    pub(crate) fn with_column_replaced(mut self, index: usize, column: Column) -> Table {
        self.columns[index] = column;
        self
    }

    pub(crate) fn with_charset(mut self, charset: Charset) -> Table {
        self.charset = charset;
        self
    }

    pub(crate) fn renamed(mut self, name: String) -> Table {
        self.name = name;
        self
    }
}

/// 데이터베이스: 순서가 있는 테이블 이름 -> 테이블 매핑.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    tables: Vec<Arc<Table>>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Database {
            name: name.into(),
            tables: Vec::new(),
        }
    }

    pub fn find_table(&self, name: &str, case_sensitive: bool) -> Option<&Table> {
        self.tables
            .iter()
            .map(|t| t.as_ref())
            .find(|t| names_eq(&t.name, name, case_sensitive))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().map(|t| t.as_ref())
    }

    pub(crate) fn table_index(&self, name: &str, case_sensitive: bool) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| names_eq(&t.name, name, case_sensitive))
    }

    pub(crate) fn push_table(mut self, table: Table) -> Database {
        self.tables.push(Arc::new(table));
        self
    }

    pub(crate) fn with_table(mut self, index: usize, table: Table) -> Database {
        self.tables[index] = Arc::new(table);
        self
    }

    pub(crate) fn remove_table(mut self, index: usize) -> Database {
        self.tables.remove(index);
        self
    }

    pub(crate) fn table_at(&self, index: usize) -> &Table {
        &self.tables[index]
    }
}

fn names_eq(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// 전체 스키마 스냅샷. 데이터베이스 이름은 `case_sensitive` 플래그 하에
/// 유일해야 하고, 각 테이블 내부의 컬럼 위치는 0부터 연속이어야 한다
/// (이는 `copy`/델타 적용 과정에서 유지되는 불변식이다).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    databases: Vec<Arc<Database>>,
    pub case_sensitive: bool,
}

impl Schema {
    pub fn empty(case_sensitive: bool) -> Self {
        Schema {
            databases: Vec::new(),
            case_sensitive,
        }
    }

    pub fn find_database(&self, name: &str) -> Option<&Database> {
        self.databases
            .iter()
            .map(|d| d.as_ref())
            .find(|d| names_eq(&d.name, name, self.case_sensitive))
    }

    pub fn databases(&self) -> impl Iterator<Item = &Database> {
        self.databases.iter().map(|d| d.as_ref())
    }

    /// 구조적 공유를 사용하는 얕은 복사. 반환된 스냅샷을 변경해도 `self`는
    /// 관찰 가능하게 바뀌지 않는다 — `Arc`를 새로 가리키게 교체할 뿐이다.
    pub fn copy(&self) -> Schema {
        Schema {
            databases: self.databases.clone(),
            case_sensitive: self.case_sensitive,
        }
    }

    pub(crate) fn database_index(&self, name: &str) -> Option<usize> {
        self.databases
            .iter()
            .position(|d| names_eq(&d.name, name, self.case_sensitive))
    }

    pub(crate) fn with_database(mut self, index: usize, db: Database) -> Schema {
        self.databases[index] = Arc::new(db);
        self
    }

    pub(crate) fn push_database(mut self, db: Database) -> Schema {
        self.databases.push(Arc::new(db));
        self
    }

    pub(crate) fn remove_database(mut self, index: usize) -> Schema {
        self.databases.remove(index);
        self
    }

    /// 두 스키마 사이의 모든 차이를 사람이 읽을 수 있는 줄로 적어 `out`에
    /// 덧붙인다. 로깅/검증 전용이며 어떤 동작도 구동하지 않는다.
    pub fn diff(&self, other: &Schema, out: &mut Vec<String>, left_tag: &str, right_tag: &str) {
        for db in self.databases() {
            match other.find_database(&db.name) {
                None => out.push(format!("{left_tag}: database {} missing from {right_tag}", db.name)),
                Some(other_db) => diff_database(db, other_db, out, left_tag, right_tag),
            }
        }
        for db in other.databases() {
            if self.find_database(&db.name).is_none() {
                out.push(format!("{right_tag}: database {} missing from {left_tag}", db.name));
            }
        }
    }
}

fn diff_database(a: &Database, b: &Database, out: &mut Vec<String>, left_tag: &str, right_tag: &str) {
    for t in a.tables() {
        match b.find_table(&t.name, true) {
            None => out.push(format!(
                "{left_tag}: table {}.{} missing from {right_tag}",
                a.name, t.name
            )),
            Some(bt) => diff_table(a, t, bt, out, left_tag, right_tag),
        }
    }
    for t in b.tables() {
        if a.find_table(&t.name, true).is_none() {
            out.push(format!(
                "{right_tag}: table {}.{} missing from {left_tag}",
                b.name, t.name
            ));
        }
    }
}

fn diff_table(db: &Database, a: &Table, b: &Table, out: &mut Vec<String>, left_tag: &str, right_tag: &str) {
    if a.columns.len() != b.columns.len() {
        out.push(format!(
            "{}.{}: column count {left_tag}={} {right_tag}={}",
            db.name,
            a.name,
            a.columns.len(),
            b.columns.len()
        ));
    }
    for (i, ca) in a.columns.iter().enumerate() {
        match b.columns.get(i) {
            None => out.push(format!(
                "{}.{}: column #{i} ({}) missing from {right_tag}",
                db.name, a.name, ca.name
            )),
            Some(cb) => {
                if ca.name != cb.name {
                    out.push(format!(
                        "{}.{}: column #{i} name {left_tag}={} {right_tag}={}",
                        db.name, a.name, ca.name, cb.name
                    ));
                }
                if let Some(d) = ca.column_type.diff(&cb.column_type) {
                    out.push(format!("{}.{}.{}: type {d}", db.name, a.name, ca.name));
                }
            }
        }
    }
}

/// 테이블 조회 헬퍼. 델타 적용 시 공통으로 쓰인다.
pub(crate) fn require_database<'a>(schema: &'a Schema, name: &str) -> Result<(&'a Database, usize), SchemaSyncError> {
    let idx = schema
        .database_index(name)
        .ok_or_else(|| SchemaSyncError::MissingDatabase(name.to_string()))?;
    Ok((schema.find_database(name).unwrap(), idx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_col(name: &str) -> Column {
        Column {
            name: name.to_string(),
            column_type: ColumnType::Int { width: 32, unsigned: false },
            nullable: true,
        }
    }

    #[test]
    fn copy_is_independent_of_predecessor() {
        let mut db = Database::new("d");
        db.tables.push(Arc::new(Table {
            name: "u".to_string(),
            columns: vec![int_col("id")],
            charset: Charset::default(),
        }));
        let schema = Schema::empty(false).push_database(db);

        let copy = schema.copy();
        let (_, idx) = require_database(&copy, "d").unwrap();
        let mutated = copy.with_database(idx, Database::new("d"));

        assert!(schema.find_database("d").unwrap().find_table("u", true).is_some());
        assert!(mutated.find_database("d").unwrap().find_table("u", true).is_none());
    }

    #[test]
    fn find_database_case_insensitive_by_default() {
        let schema = Schema::empty(false).push_database(Database::new("MyDb"));
        assert!(schema.find_database("mydb").is_some());
    }

    #[test]
    fn find_database_respects_case_sensitive_flag() {
        let schema = Schema::empty(true).push_database(Database::new("MyDb"));
        assert!(schema.find_database("mydb").is_none());
        assert!(schema.find_database("MyDb").is_some());
    }

    #[test]
    fn decode_int_roundtrip() {
        let ty = ColumnType::Int { width: 32, unsigned: false };
        let v = ty.decode(&crate::events::CellValue::Int32(42), "d", "u", "id").unwrap();
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn decode_type_mismatch_is_cast_error() {
        let ty = ColumnType::Int { width: 32, unsigned: false };
        let err = ty
            .decode(&crate::events::CellValue::String("x".to_string()), "d", "u", "id")
            .unwrap_err();
        assert_eq!(err.column, "id");
    }
}
