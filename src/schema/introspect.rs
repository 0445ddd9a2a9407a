//! 라이브 MySQL 카탈로그로부터 초기 `Schema`를 캡처한다.
//!
//! DDL 문 파서(`ddl_parser`)와는 별개의 경로다: 여기서는
//! `INFORMATION_SCHEMA.COLUMNS`가 보고하는 `COLUMN_TYPE` 문자열
//! (예: `"int(11) unsigned"`, `"varchar(255)"`)을 해석하며, 그
//! 포맷은 DDL 소스 문법과 다르다.

use crate::connection::{ColumnInfo, MySqlConnection};
use crate::error::{CdcError, Result};
use crate::schema::model::{Charset, Column, ColumnType, Database, Schema, TemporalKind};
use crate::schema::model::Table as SchemaTable;
use regex::Regex;
use std::sync::OnceLock;

/// `databases`에 나열된 각 데이터베이스의 모든 테이블을 조회해 `Schema`를
/// 구성한다. `databases`가 비어 있으면 서버의 모든 데이터베이스를 쓴다.
pub async fn capture_schema(
    conn: &mut MySqlConnection,
    databases: &[String],
    case_sensitive: bool,
) -> Result<Schema> {
    let target_databases = if databases.is_empty() {
        conn.get_databases().await?
    } else {
        databases.to_vec()
    };

    let mut schema = Schema::empty(case_sensitive);
    for db_name in target_databases {
        if is_system_database(&db_name) {
            continue;
        }
        let mut database = Database::new(db_name.clone());
        for table_name in conn.get_tables(&db_name).await? {
            let columns = conn.get_table_schema(&db_name, &table_name).await?;
            database = database.push_table(build_table(&table_name, &columns)?);
        }
        schema = schema.push_database(database);
    }
    Ok(schema)
}

/// 단일 테이블만 다시 조회한다. `ColumnCastError`를 만난 뒤 추적 중인
/// 정의와 라이브 카탈로그를 비교하기 위한 좁은 경로다 (spec §4.F).
pub async fn introspect_table(conn: &mut MySqlConnection, database: &str, table: &str) -> Result<SchemaTable> {
    let columns = conn.get_table_schema(database, table).await?;
    build_table(table, &columns)
}

fn is_system_database(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "information_schema" | "mysql" | "performance_schema" | "sys"
    )
}

fn build_table(name: &str, columns: &[ColumnInfo]) -> Result<SchemaTable> {
    let charset = columns
        .iter()
        .find_map(|c| c.charset.clone())
        .map(Charset)
        .unwrap_or_default();

    let parsed = columns
        .iter()
        .map(|c| {
            Ok(Column {
                name: c.name.clone(),
                column_type: parse_column_type(&c.column_type, c.charset.as_deref())?,
                nullable: c.nullable,
            })
        })
        .collect::<Result<Vec<Column>>>()?;

    Ok(SchemaTable {
        name: name.to_string(),
        columns: parsed,
        charset,
    })
}

/// `information_schema.columns.COLUMN_TYPE`의 표현을 `ColumnType`으로 해석한다.
fn parse_column_type(raw: &str, charset: Option<&str>) -> Result<ColumnType> {
    static COLUMN_TYPE: OnceLock<Regex> = OnceLock::new();
    let re = COLUMN_TYPE.get_or_init(|| {
        Regex::new(r"(?is)^(?P<type>\w+)\s*(?:\((?P<args>[^)]*)\))?\s*(?P<rest>.*)$")
            .expect("static column type regex must compile")
    });

    let caps = re
        .captures(raw.trim())
        .ok_or_else(|| CdcError::Other(format!("unrecognized column type: {raw}")))?;
    let type_name = caps["type"].to_ascii_uppercase();
    let args = caps.name("args").map(|m| m.as_str().to_string()).unwrap_or_default();
    let rest = caps["rest"].to_ascii_uppercase();
    let unsigned = rest.contains("UNSIGNED");

    let charset = charset.map(|c| Charset(c.to_string()));

    let column_type = match type_name.as_str() {
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => {
            let width = match type_name.as_str() {
                "TINYINT" => 8,
                "SMALLINT" => 16,
                "MEDIUMINT" => 24,
                "BIGINT" => 64,
                _ => 32,
            };
            ColumnType::Int { width, unsigned }
        }
        "DECIMAL" | "NUMERIC" => {
            let mut nums = args.split(',').map(|s| s.trim().parse::<u16>().unwrap_or(0));
            ColumnType::Decimal {
                precision: nums.next().unwrap_or(10),
                scale: nums.next().unwrap_or(0),
            }
        }
        "VARCHAR" | "CHAR" => ColumnType::VarString {
            length: args.trim().parse().unwrap_or(255),
            charset: charset.unwrap_or_default(),
        },
        "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => ColumnType::Blob {
            length: 0,
            charset: Some(charset.unwrap_or_default()),
        },
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
            ColumnType::Blob { length: args.trim().parse().unwrap_or(0), charset: None }
        }
        "ENUM" => ColumnType::Enum { values: parse_quoted_list(&args) },
        "SET" => ColumnType::Set { values: parse_quoted_list(&args) },
        "DATE" => ColumnType::Temporal { kind: TemporalKind::Date, fsp: 0 },
        "TIME" => ColumnType::Temporal { kind: TemporalKind::Time, fsp: args.trim().parse().unwrap_or(0) },
        "DATETIME" => ColumnType::Temporal { kind: TemporalKind::DateTime, fsp: args.trim().parse().unwrap_or(0) },
        "TIMESTAMP" => ColumnType::Temporal { kind: TemporalKind::Timestamp, fsp: args.trim().parse().unwrap_or(0) },
        "YEAR" => ColumnType::Temporal { kind: TemporalKind::Year, fsp: 0 },
        "JSON" => ColumnType::Json,
        other => return Err(CdcError::Other(format!("unsupported column type: {other}"))),
    };

    Ok(column_type)
}

fn parse_quoted_list(args: &str) -> Vec<String> {
    args.split(',')
        .map(|s| s.trim().trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unsigned_int_with_width() {
        let ty = parse_column_type("int(11) unsigned", None).unwrap();
        assert_eq!(ty, ColumnType::Int { width: 32, unsigned: true });
    }

    #[test]
    fn parses_varchar_with_charset() {
        let ty = parse_column_type("varchar(255)", Some("utf8mb4")).unwrap();
        assert_eq!(
            ty,
            ColumnType::VarString { length: 255, charset: Charset("utf8mb4".to_string()) }
        );
    }

    #[test]
    fn parses_decimal_precision_and_scale() {
        let ty = parse_column_type("decimal(10,2)", None).unwrap();
        assert_eq!(ty, ColumnType::Decimal { precision: 10, scale: 2 });
    }

    #[test]
    fn parses_enum_values() {
        let ty = parse_column_type("enum('a','b')", None).unwrap();
        assert_eq!(ty, ColumnType::Enum { values: vec!["a".to_string(), "b".to_string()] });
    }

    #[test]
    fn parses_datetime_with_fractional_seconds() {
        let ty = parse_column_type("datetime(6)", None).unwrap();
        assert_eq!(ty, ColumnType::Temporal { kind: TemporalKind::DateTime, fsp: 6 });
    }

    #[test]
    fn unsupported_type_is_an_error() {
        assert!(parse_column_type("geometry", None).is_err());
    }

    #[test]
    fn build_table_picks_up_dominant_charset_from_columns() {
        let columns = vec![ColumnInfo {
            name: "name".to_string(),
            column_type: "varchar(255)".to_string(),
            nullable: true,
            is_key: false,
            extra: String::new(),
            charset: Some("latin1".to_string()),
        }];
        let table = build_table("t", &columns).unwrap();
        assert_eq!(table.charset, Charset("latin1".to_string()));
    }
}
