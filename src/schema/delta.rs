//! DDL 변경 객체: 태그된 변형 + 순수 `apply`
//!
//! 깊은 상속 계층(추상 베이스 + 서브클래스 오버라이드) 대신 하나의
//! `SchemaDelta` 열거형과 명시적 판별자 매치로 재구성했다. `apply`는
//! `self`에 대해 순수하며 — 전제 조건이 깨지면 `SchemaSyncError`로 실패하고
//! 입력 스키마는 절대 바뀌지 않는다. 멱등이 보장되는 건 결과가 입력과
//! 같아지는 경우뿐이며, 반복 적용 전반에 걸친 멱등성은 일반적으로
//! 보장하지 않는다.

use super::model::{require_database, Charset, Column, ColumnType, Database, Schema, Table};
use crate::error::SchemaSyncError;

/// `CREATE TABLE IF NOT EXISTS` / `DROP TABLE IF EXISTS` 류의 연착륙 플래그.
/// 켜져 있으면 "이미 존재함"/"존재하지 않음" 전제 조건 실패가 에러 대신
/// no-op으로 내려간다. 그 외의 모든 전제 조건 위반은 여전히 하드 에러다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftFailure {
    pub if_not_exists: bool,
    pub if_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDelta {
    CreateDatabase {
        name: String,
        soft: SoftFailure,
    },
    DropDatabase {
        name: String,
        soft: SoftFailure,
    },
    CreateTable {
        database: String,
        table: Table,
        soft: SoftFailure,
    },
    DropTable {
        database: String,
        table: String,
        soft: SoftFailure,
    },
    RenameTable {
        database: String,
        from: String,
        to: String,
    },
    AddColumn {
        database: String,
        table: String,
        column: Column,
        position: usize,
    },
    DropColumn {
        database: String,
        table: String,
        column: String,
    },
    ChangeColumn {
        database: String,
        table: String,
        column: String,
        new_definition: Column,
    },
    ModifyEncoding {
        database: String,
        table: String,
        charset: Charset,
    },
}

impl SchemaDelta {
    /// 입력 스키마를 건드리지 않고 새 스냅샷을 돌려준다 (copy-on-write).
    pub fn apply(&self, schema: &Schema) -> Result<Schema, SchemaSyncError> {
        match self {
            SchemaDelta::CreateDatabase { name, soft } => {
                if schema.find_database(name).is_some() {
                    if soft.if_not_exists {
                        return Ok(schema.copy());
                    }
                    return Err(SchemaSyncError::DuplicateName(name.clone()));
                }
                Ok(schema.copy().push_database(Database::new(name.clone())))
            }

            SchemaDelta::DropDatabase { name, soft } => match schema.database_index(name) {
                Some(idx) => Ok(schema.copy().remove_database(idx)),
                None if soft.if_exists => Ok(schema.copy()),
                None => Err(SchemaSyncError::MissingDatabase(name.clone())),
            },

            SchemaDelta::CreateTable { database, table, soft } => {
                let (db, idx) = require_database(schema, database)?;
                if db.find_table(&table.name, schema.case_sensitive).is_some() {
                    if soft.if_not_exists {
                        return Ok(schema.copy());
                    }
                    return Err(SchemaSyncError::DuplicateName(table.name.clone()));
                }
                let db = db.clone().push_table(table.clone());
                Ok(schema.copy().with_database(idx, db))
            }

            SchemaDelta::DropTable { database, table, soft } => {
                let (db, idx) = require_database(schema, database)?;
                match db.table_index(table, schema.case_sensitive) {
                    Some(t_idx) => {
                        let db = db.clone().remove_table(t_idx);
                        Ok(schema.copy().with_database(idx, db))
                    }
                    None if soft.if_exists => Ok(schema.copy()),
                    None => Err(SchemaSyncError::MissingTable(database.clone(), table.clone())),
                }
            }

            SchemaDelta::RenameTable { database, from, to } => {
                let (db, idx) = require_database(schema, database)?;
                let t_idx = db
                    .table_index(from, schema.case_sensitive)
                    .ok_or_else(|| SchemaSyncError::MissingTable(database.clone(), from.clone()))?;
                if db.table_index(to, schema.case_sensitive).is_some() {
                    return Err(SchemaSyncError::DuplicateName(to.clone()));
                }
                let renamed = db.table_at(t_idx).clone().renamed(to.clone());
                let db = db.clone().with_table(t_idx, renamed);
                Ok(schema.copy().with_database(idx, db))
            }

            SchemaDelta::AddColumn {
                database,
                table,
                column,
                position,
            } => {
                let (db, idx) = require_database(schema, database)?;
                let t_idx = db
                    .table_index(table, schema.case_sensitive)
                    .ok_or_else(|| SchemaSyncError::MissingTable(database.clone(), table.clone()))?;
                let t = db.table_at(t_idx);
                if *position > t.columns.len() {
                    return Err(SchemaSyncError::IndexOutOfRange {
                        index: *position,
                        len: t.columns.len(),
                    });
                }
                if t.find_column_index(&column.name, schema.case_sensitive).is_some() {
                    return Err(SchemaSyncError::DuplicateName(column.name.clone()));
                }
                let t = t.clone().with_column_inserted(*position, column.clone());
                let db = db.clone().with_table(t_idx, t);
                Ok(schema.copy().with_database(idx, db))
            }

            SchemaDelta::DropColumn { database, table, column } => {
                let (db, idx) = require_database(schema, database)?;
                let t_idx = db
                    .table_index(table, schema.case_sensitive)
                    .ok_or_else(|| SchemaSyncError::MissingTable(database.clone(), table.clone()))?;
                let t = db.table_at(t_idx);
                let c_idx = t
                    .find_column_index(column, schema.case_sensitive)
                    .ok_or_else(|| SchemaSyncError::MissingColumn(database.clone(), table.clone(), column.clone()))?;
                let t = t.clone().with_column_removed(c_idx);
                let db = db.clone().with_table(t_idx, t);
                Ok(schema.copy().with_database(idx, db))
            }

            SchemaDelta::ChangeColumn {
                database,
                table,
                column,
                new_definition,
            } => {
                let (db, idx) = require_database(schema, database)?;
                let t_idx = db
                    .table_index(table, schema.case_sensitive)
                    .ok_or_else(|| SchemaSyncError::MissingTable(database.clone(), table.clone()))?;
                let t = db.table_at(t_idx);
                let c_idx = t
                    .find_column_index(column, schema.case_sensitive)
                    .ok_or_else(|| SchemaSyncError::MissingColumn(database.clone(), table.clone(), column.clone()))?;
                let t = t.clone().with_column_replaced(c_idx, new_definition.clone());
                let db = db.clone().with_table(t_idx, t);
                Ok(schema.copy().with_database(idx, db))
            }

            SchemaDelta::ModifyEncoding { database, table, charset } => {
                let (db, idx) = require_database(schema, database)?;
                let t_idx = db
                    .table_index(table, schema.case_sensitive)
                    .ok_or_else(|| SchemaSyncError::MissingTable(database.clone(), table.clone()))?;
                let t = db.table_at(t_idx).clone().with_charset(charset.clone());
                let db = db.clone().with_table(t_idx, t);
                Ok(schema.copy().with_database(idx, db))
            }
        }
    }
}

/// ordered list of deltas 를 접어서 스키마를 만든다. 이 함수로 얻은 결과는
/// 각 중간 스냅샷을 물리화하고 마지막 것만 읽어도 항상 같아야 한다
/// (replay equivalence, spec §8 property 2).
pub fn fold(initial: &Schema, deltas: &[SchemaDelta]) -> Result<Schema, SchemaSyncError> {
    let mut current = initial.copy();
    for delta in deltas {
        current = delta.apply(&current)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::model::ColumnType;

    fn int_col(name: &str) -> Column {
        Column {
            name: name.to_string(),
            column_type: ColumnType::Int { width: 32, unsigned: false },
            nullable: true,
        }
    }

    fn varchar_col(name: &str, length: u32) -> Column {
        Column {
            name: name.to_string(),
            column_type: ColumnType::VarString { length, charset: Charset::default() },
            nullable: true,
        }
    }

    #[test]
    fn delta_purity_never_mutates_input() {
        let schema = Schema::empty(false);
        let delta = SchemaDelta::CreateDatabase {
            name: "d".to_string(),
            soft: SoftFailure::default(),
        };
        let before = schema.copy();
        let _ = delta.apply(&schema).unwrap();
        assert_eq!(schema, before);
    }

    #[test]
    fn s1_simple_insert_schema_shape() {
        let schema = Schema::empty(false);
        let deltas = vec![
            SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() },
            SchemaDelta::CreateTable {
                database: "d".to_string(),
                table: Table {
                    name: "u".to_string(),
                    columns: vec![int_col("id"), varchar_col("name", 32)],
                    charset: Charset::default(),
                },
                soft: SoftFailure::default(),
            },
        ];
        let schema = fold(&schema, &deltas).unwrap();
        let table = schema.find_database("d").unwrap().find_table("u", true).unwrap();
        assert_eq!(table.columns[0].name, "id");
        assert_eq!(table.columns[1].name, "name");
    }

    #[test]
    fn s2_add_column_mid_stream_preserves_order() {
        let schema = Schema::empty(false);
        let schema = fold(
            &schema,
            &[
                SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() },
                SchemaDelta::CreateTable {
                    database: "d".to_string(),
                    table: Table {
                        name: "u".to_string(),
                        columns: vec![int_col("id"), varchar_col("name", 32)],
                        charset: Charset::default(),
                    },
                    soft: SoftFailure::default(),
                },
            ],
        )
        .unwrap();

        let with_age = SchemaDelta::AddColumn {
            database: "d".to_string(),
            table: "u".to_string(),
            column: int_col("age"),
            position: 2,
        }
        .apply(&schema)
        .unwrap();

        let table = with_age.find_database("d").unwrap().find_table("u", true).unwrap();
        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.columns[2].name, "age");

        // first snapshot is untouched
        let original_table = schema.find_database("d").unwrap().find_table("u", true).unwrap();
        assert_eq!(original_table.columns.len(), 2);
    }

    #[test]
    fn s3_duplicate_create_table_is_duplicate_name_error() {
        let schema = Schema::empty(false);
        let schema = SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() }
            .apply(&schema)
            .unwrap();
        let create = SchemaDelta::CreateTable {
            database: "d".to_string(),
            table: Table { name: "u".to_string(), columns: vec![int_col("id")], charset: Charset::default() },
            soft: SoftFailure::default(),
        };
        let schema = create.apply(&schema).unwrap();
        let err = create.apply(&schema).unwrap_err();
        assert_eq!(err, SchemaSyncError::DuplicateName("u".to_string()));
    }

    #[test]
    fn create_if_not_exists_degrades_to_noop() {
        let schema = Schema::empty(false);
        let schema = SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() }
            .apply(&schema)
            .unwrap();
        let create = SchemaDelta::CreateTable {
            database: "d".to_string(),
            table: Table { name: "u".to_string(), columns: vec![int_col("id")], charset: Charset::default() },
            soft: SoftFailure { if_not_exists: true, if_exists: false },
        };
        let schema = create.apply(&schema).unwrap();
        // second application with if_not_exists must not error
        assert!(create.apply(&schema).is_ok());
    }

    #[test]
    fn drop_missing_table_is_hard_error_without_if_exists() {
        let schema = Schema::empty(false);
        let schema = SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() }
            .apply(&schema)
            .unwrap();
        let err = SchemaDelta::DropTable {
            database: "d".to_string(),
            table: "missing".to_string(),
            soft: SoftFailure::default(),
        }
        .apply(&schema)
        .unwrap_err();
        assert_eq!(err, SchemaSyncError::MissingTable("d".to_string(), "missing".to_string()));
    }

    #[test]
    fn add_column_out_of_range_index_is_rejected() {
        let schema = Schema::empty(false);
        let schema = fold(
            &schema,
            &[
                SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() },
                SchemaDelta::CreateTable {
                    database: "d".to_string(),
                    table: Table { name: "u".to_string(), columns: vec![int_col("id")], charset: Charset::default() },
                    soft: SoftFailure::default(),
                },
            ],
        )
        .unwrap();

        let err = SchemaDelta::AddColumn {
            database: "d".to_string(),
            table: "u".to_string(),
            column: int_col("age"),
            position: 99,
        }
        .apply(&schema)
        .unwrap_err();
        assert_eq!(err, SchemaSyncError::IndexOutOfRange { index: 99, len: 1 });
    }

    #[test]
    fn replay_equivalence_fold_equals_stepwise_materialization() {
        let schema = Schema::empty(false);
        let deltas = vec![
            SchemaDelta::CreateDatabase { name: "d".to_string(), soft: SoftFailure::default() },
            SchemaDelta::CreateTable {
                database: "d".to_string(),
                table: Table { name: "u".to_string(), columns: vec![int_col("id")], charset: Charset::default() },
                soft: SoftFailure::default(),
            },
            SchemaDelta::AddColumn {
                database: "d".to_string(),
                table: "u".to_string(),
                column: varchar_col("name", 32),
                position: 1,
            },
        ];

        let folded = fold(&schema, &deltas).unwrap();

        let mut stepwise = schema.copy();
        let mut last = None;
        for delta in &deltas {
            stepwise = delta.apply(&stepwise).unwrap();
            last = Some(stepwise.clone());
        }

        assert_eq!(folded, last.unwrap());
    }
}
