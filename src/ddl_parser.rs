//! DDL 파서: 화이트리스트된 문장 모양만 인식해 `SchemaDelta`로 옮긴다.
//!
//! 전체 SQL 문법이 필요한 게 아니라 이 데몬이 추적해야 하는 소수의 구문
//! (CREATE/DROP DATABASE, CREATE/DROP/RENAME TABLE, ALTER TABLE ADD/DROP/
//! MODIFY COLUMN, CONVERT TO CHARACTER SET)만 알면 된다 — 그래서 팩의
//! 전체 문법 파서(`sql-parse`, `nom-sql`)를 끌어오는 대신 teacher의
//! `gtid.rs`가 보여주는 정규식 스타일을 그대로 따른다.
//!
//! `ADD COLUMN ... AFTER x` / 끝에 추가하는 위치는 현재 스키마를 봐야만
//! 정수 인덱스로 바뀌므로, 파서는 현재 추적 중인 `Schema`를 함께 받는다.

use crate::error::ParseError;
use crate::schema::delta::SoftFailure;
use crate::schema::model::{Charset, Column, ColumnType, Schema, Table, TemporalKind};
use crate::schema::SchemaDelta;
use regex::Regex;
use std::sync::OnceLock;

pub trait DdlParser: Send + Sync {
    fn parse(&self, sql: &str, default_database: &str, schema: &Schema) -> Result<Vec<SchemaDelta>, ParseError>;
}

#[derive(Default)]
pub struct RegexDdlParser;

impl DdlParser for RegexDdlParser {
    fn parse(&self, sql: &str, default_database: &str, schema: &Schema) -> Result<Vec<SchemaDelta>, ParseError> {
        let mut out = Vec::new();
        for statement in split_statements(sql) {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            out.push(parse_statement(statement, default_database, schema)?);
        }
        Ok(out)
    }
}

/// 세미콜론으로 문장을 나누되, 문자열 리터럴/식별자 인용/줄 주석 안의
/// 세미콜론은 무시한다.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                } else if c == '\\' {
                    if let Some(&next) = chars.peek() {
                        current.push(next);
                        chars.next();
                    }
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    while let Some(&n) = chars.peek() {
                        if n == '\n' {
                            break;
                        }
                        chars.next();
                    }
                }
                ';' => {
                    statements.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static DDL regex must compile")
}

fn ident(name: &str) -> String {
    name.trim_matches('`').to_string()
}

/// `db.table` 혹은 `table`을 `(database, table)`로 나눈다. 두 번째 경우
/// `default_database`를 붙인다.
fn split_qualified<'a>(raw: &'a str, default_database: &'a str) -> (String, String) {
    match raw.split_once('.') {
        Some((db, table)) => (ident(db), ident(table)),
        None => (default_database.to_string(), ident(raw)),
    }
}

fn parse_statement(statement: &str, default_database: &str, schema: &Schema) -> Result<SchemaDelta, ParseError> {
    static CREATE_DATABASE: OnceLock<Regex> = OnceLock::new();
    static DROP_DATABASE: OnceLock<Regex> = OnceLock::new();
    static RENAME_TABLE: OnceLock<Regex> = OnceLock::new();
    static DROP_TABLE: OnceLock<Regex> = OnceLock::new();
    static CREATE_TABLE: OnceLock<Regex> = OnceLock::new();
    static ALTER_ADD_COLUMN: OnceLock<Regex> = OnceLock::new();
    static ALTER_DROP_COLUMN: OnceLock<Regex> = OnceLock::new();
    static ALTER_MODIFY_COLUMN: OnceLock<Regex> = OnceLock::new();
    static ALTER_CONVERT_CHARSET: OnceLock<Regex> = OnceLock::new();

    let create_database = CREATE_DATABASE.get_or_init(|| {
        re(r"(?is)^CREATE\s+(?:DATABASE|SCHEMA)\s+(IF\s+NOT\s+EXISTS\s+)?`?(?P<name>[\w$]+)`?\s*(?:.*)?$")
    });
    let drop_database = DROP_DATABASE.get_or_init(|| {
        re(r"(?is)^DROP\s+(?:DATABASE|SCHEMA)\s+(IF\s+EXISTS\s+)?`?(?P<name>[\w$]+)`?\s*$")
    });
    let rename_table = RENAME_TABLE
        .get_or_init(|| re(r"(?is)^RENAME\s+TABLE\s+(?P<from>[\w$.`]+)\s+TO\s+(?P<to>[\w$.`]+)\s*$"));
    let drop_table = DROP_TABLE.get_or_init(|| {
        re(r"(?is)^DROP\s+TABLE\s+(IF\s+EXISTS\s+)?(?P<name>[\w$.`]+)\s*$")
    });
    let create_table = CREATE_TABLE.get_or_init(|| {
        re(r"(?is)^CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?(?P<name>[\w$.`]+)\s*\((?P<body>.*)\)\s*(?:ENGINE.*)?$")
    });
    let alter_add = ALTER_ADD_COLUMN.get_or_init(|| {
        re(r"(?is)^ALTER\s+TABLE\s+(?P<name>[\w$.`]+)\s+ADD\s+(?:COLUMN\s+)?(?P<coldef>`?[\w$]+`?\s+[^,]+?)(?:\s+AFTER\s+`?(?P<after>[\w$]+)`?)?\s*$")
    });
    let alter_drop = ALTER_DROP_COLUMN.get_or_init(|| {
        re(r"(?is)^ALTER\s+TABLE\s+(?P<name>[\w$.`]+)\s+DROP\s+(?:COLUMN\s+)?`?(?P<column>[\w$]+)`?\s*$")
    });
    let alter_modify = ALTER_MODIFY_COLUMN.get_or_init(|| {
        re(r"(?is)^ALTER\s+TABLE\s+(?P<name>[\w$.`]+)\s+MODIFY\s+(?:COLUMN\s+)?(?P<coldef>`?[\w$]+`?\s+.+)$")
    });
    let alter_convert = ALTER_CONVERT_CHARSET.get_or_init(|| {
        re(r"(?is)^ALTER\s+TABLE\s+(?P<name>[\w$.`]+)\s+CONVERT\s+TO\s+CHARACTER\s+SET\s+(?P<charset>[\w]+)")
    });

    if let Some(caps) = create_database.captures(statement) {
        return Ok(SchemaDelta::CreateDatabase {
            name: ident(&caps["name"]),
            soft: SoftFailure { if_not_exists: caps.get(1).is_some(), ..Default::default() },
        });
    }
    if let Some(caps) = drop_database.captures(statement) {
        return Ok(SchemaDelta::DropDatabase {
            name: ident(&caps["name"]),
            soft: SoftFailure { if_exists: caps.get(1).is_some(), ..Default::default() },
        });
    }
    if let Some(caps) = rename_table.captures(statement) {
        let (database, from) = split_qualified(&caps["from"], default_database);
        let (_, to) = split_qualified(&caps["to"], default_database);
        return Ok(SchemaDelta::RenameTable { database, from, to });
    }
    if let Some(caps) = drop_table.captures(statement) {
        let (database, table) = split_qualified(&caps["name"], default_database);
        return Ok(SchemaDelta::DropTable {
            database,
            table,
            soft: SoftFailure { if_exists: caps.get(1).is_some(), ..Default::default() },
        });
    }
    if let Some(caps) = create_table.captures(statement) {
        let (database, table_name) = split_qualified(&caps["name"], default_database);
        let columns = parse_column_defs(&caps["body"])?;
        return Ok(SchemaDelta::CreateTable {
            database,
            table: Table { name: table_name, columns, charset: Charset::default() },
            soft: SoftFailure { if_not_exists: caps.get(1).is_some(), ..Default::default() },
        });
    }
    if let Some(caps) = alter_add.captures(statement) {
        let (database, table_name) = split_qualified(&caps["name"], default_database);
        let column = parse_column_def(caps["coldef"].trim())?;
        let table = resolve_table(schema, &database, &table_name)?;
        let position = match caps.name("after") {
            Some(after) => {
                table
                    .find_column_index(after.as_str(), schema.case_sensitive)
                    .map(|i| i + 1)
                    .ok_or_else(|| ParseError(format!("AFTER column not found: {}", after.as_str())))?
            }
            None => table.columns.len(),
        };
        return Ok(SchemaDelta::AddColumn { database, table: table_name, column, position });
    }
    if let Some(caps) = alter_modify.captures(statement) {
        let (database, table_name) = split_qualified(&caps["name"], default_database);
        let new_definition = parse_column_def(caps["coldef"].trim())?;
        resolve_table(schema, &database, &table_name)?;
        return Ok(SchemaDelta::ChangeColumn {
            database,
            table: table_name,
            column: new_definition.name.clone(),
            new_definition,
        });
    }
    if let Some(caps) = alter_drop.captures(statement) {
        let (database, table) = split_qualified(&caps["name"], default_database);
        return Ok(SchemaDelta::DropColumn { database, table, column: ident(&caps["column"]) });
    }
    if let Some(caps) = alter_convert.captures(statement) {
        let (database, table) = split_qualified(&caps["name"], default_database);
        return Ok(SchemaDelta::ModifyEncoding { database, table, charset: Charset(caps["charset"].to_string()) });
    }

    Err(ParseError(statement.to_string()))
}

fn resolve_table<'a>(schema: &'a Schema, database: &str, table: &str) -> Result<&'a Table, ParseError> {
    schema
        .find_database(database)
        .and_then(|d| d.find_table(table, schema.case_sensitive))
        .ok_or_else(|| ParseError(format!("cannot resolve column position: no such table {database}.{table}")))
}

fn parse_column_defs(body: &str) -> Result<Vec<Column>, ParseError> {
    let mut columns = Vec::new();
    for part in split_top_level_commas(body) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let upper = trimmed.to_uppercase();
        if upper.starts_with("PRIMARY KEY")
            || upper.starts_with("KEY ")
            || upper.starts_with("INDEX ")
            || upper.starts_with("UNIQUE")
            || upper.starts_with("CONSTRAINT")
            || upper.starts_with("FOREIGN KEY")
        {
            continue;
        }
        columns.push(parse_column_def(trimmed)?);
    }
    Ok(columns)
}

fn split_top_level_commas(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in body.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_column_def(def: &str) -> Result<Column, ParseError> {
    static COLUMN_DEF: OnceLock<Regex> = OnceLock::new();
    let column_def = COLUMN_DEF.get_or_init(|| {
        re(r"(?is)^`?(?P<name>[\w$]+)`?\s+(?P<type>\w+)\s*(?:\((?P<args>[^)]*)\))?\s*(?P<rest>.*)$")
    });

    let caps = column_def.captures(def).ok_or_else(|| ParseError(def.to_string()))?;
    let name = ident(&caps["name"]);
    let type_name = caps["type"].to_uppercase();
    let args = caps.name("args").map(|m| m.as_str().to_string()).unwrap_or_default();
    let rest = caps["rest"].to_uppercase();

    let column_type = match type_name.as_str() {
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => {
            let width = match type_name.as_str() {
                "TINYINT" => 8,
                "SMALLINT" => 16,
                "MEDIUMINT" => 24,
                "BIGINT" => 64,
                _ => 32,
            };
            ColumnType::Int { width, unsigned: rest.contains("UNSIGNED") }
        }
        "DECIMAL" | "NUMERIC" => {
            let mut nums = args.split(',').map(|s| s.trim().parse::<u16>().unwrap_or(0));
            ColumnType::Decimal { precision: nums.next().unwrap_or(10), scale: nums.next().unwrap_or(0) }
        }
        "VARCHAR" | "CHAR" => ColumnType::VarString {
            length: args.trim().parse().unwrap_or(255),
            charset: Charset::default(),
        },
        "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => {
            ColumnType::Blob { length: 0, charset: Some(Charset::default()) }
        }
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
        other => return Err(ParseError(format!("unsupported column type: {other}"))),
    };

    Ok(Column { name, column_type, nullable: !rest.contains("NOT NULL") })
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
    use crate::schema::model::Database;

    #[test]
    fn parses_create_database_with_if_not_exists() {
        let parser = RegexDdlParser;
        let schema = Schema::empty(false);
        let deltas = parser.parse("CREATE DATABASE IF NOT EXISTS shop", "default", &schema).unwrap();
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            SchemaDelta::CreateDatabase { name, soft } => {
                assert_eq!(name, "shop");
                assert!(soft.if_not_exists);
            }
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    #[test]
    fn parses_create_table_with_columns() {
        let parser = RegexDdlParser;
        let schema = Schema::empty(false);
        let sql = "CREATE TABLE shop.users (id INT NOT NULL, name VARCHAR(64), PRIMARY KEY (id))";
        let deltas = parser.parse(sql, "default", &schema).unwrap();
        match &deltas[0] {
            SchemaDelta::CreateTable { database, table, .. } => {
                assert_eq!(database, "shop");
                assert_eq!(table.name, "users");
                assert_eq!(table.columns.len(), 2);
                assert!(!table.columns[0].nullable);
                assert!(table.columns[1].nullable);
            }
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    fn schema_with_users_table() -> Schema {
        let table = Table {
            name: "users".to_string(),
            columns: vec![Column { name: "id".to_string(), column_type: ColumnType::Int { width: 32, unsigned: false }, nullable: false }],
            charset: Charset::default(),
        };
        Schema::empty(false).push_database(Database::new("shop").push_table(table))
    }

    #[test]
    fn parses_alter_add_column_appending_at_end() {
        let parser = RegexDdlParser;
        let schema = schema_with_users_table();
        let deltas = parser.parse("ALTER TABLE shop.users ADD COLUMN age INT", "shop", &schema).unwrap();
        match &deltas[0] {
            SchemaDelta::AddColumn { database, table, column, position } => {
                assert_eq!(database, "shop");
                assert_eq!(table, "users");
                assert_eq!(column.name, "age");
                assert_eq!(*position, 1);
            }
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    #[test]
    fn parses_alter_add_column_after_resolves_position() {
        let parser = RegexDdlParser;
        let schema = schema_with_users_table();
        let deltas = parser.parse("ALTER TABLE shop.users ADD COLUMN name VARCHAR(64) AFTER id", "shop", &schema).unwrap();
        match &deltas[0] {
            SchemaDelta::AddColumn { position, .. } => assert_eq!(*position, 1),
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    #[test]
    fn parses_rename_table() {
        let parser = RegexDdlParser;
        let schema = Schema::empty(false);
        let deltas = parser.parse("RENAME TABLE shop.users TO shop.customers", "default", &schema).unwrap();
        match &deltas[0] {
            SchemaDelta::RenameTable { database, from, to } => {
                assert_eq!(database, "shop");
                assert_eq!(from, "users");
                assert_eq!(to, "customers");
            }
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    #[test]
    fn splits_multiple_statements_ignoring_semicolons_in_strings() {
        let parser = RegexDdlParser;
        let schema = Schema::empty(false);
        let sql = "CREATE DATABASE a; CREATE DATABASE b";
        let deltas = parser.parse(sql, "default", &schema).unwrap();
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn unrecognized_statement_is_a_parse_error() {
        let parser = RegexDdlParser;
        let schema = Schema::empty(false);
        assert!(parser.parse("TRUNCATE TABLE users", "default", &schema).is_err());
    }

    #[test]
    fn add_column_on_unknown_table_is_a_parse_error() {
        let parser = RegexDdlParser;
        let schema = Schema::empty(false);
        assert!(parser.parse("ALTER TABLE shop.users ADD COLUMN age INT", "shop", &schema).is_err());
    }
}
