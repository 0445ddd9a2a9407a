//! DML 디코드 계약: binlog 행 이미지를 추적 중인 테이블 정의에 맞춰
//! 컬럼명으로 키잉된 정규 값 맵으로 바꾼다 (spec §4.F 디코드 계약).
//!
//! 컬럼은 순번(ordinal)으로 짝짓는다 — binlog 행 이미지 자체는 컬럼 이름을
//! 싣지 않으므로, 이 순번이 이벤트가 속한 포지션에서의 스냅샷에 대한
//! 유일한 정체성이다.

use crate::error::ColumnCastError;
use crate::events::CellValue;
use crate::schema::{Table, Value};
use std::collections::HashMap;

/// 하나의 행 이미지를 디코드한다. 이미지에 없는 뒤쪽 컬럼(짧은 이미지)은
/// 건너뛴다 — MySQL은 `binlog_row_image=MINIMAL`일 때 이런 이미지를 보낼
/// 수 있다.
pub fn decode_row(
    table: &Table,
    database: &str,
    row: &[CellValue],
) -> Result<HashMap<String, Value>, ColumnCastError> {
    let mut out = HashMap::with_capacity(row.len().min(table.columns.len()));
    for (ordinal, raw) in row.iter().enumerate() {
        let column = table.column_at(ordinal).ok_or_else(|| ColumnCastError {
            database: database.to_string(),
            table: table.name.clone(),
            column: format!("#{ordinal}"),
            reason: format!(
                "row image has {} columns but tracked table has {}",
                row.len(),
                table.columns.len()
            ),
        })?;
        let value = column.column_type.decode(raw, database, &table.name, &column.name)?;
        out.insert(column.name.clone(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Charset, Column, ColumnType};

    fn table() -> Table {
        Table {
            name: "u".to_string(),
            columns: vec![
                Column { name: "id".to_string(), column_type: ColumnType::Int { width: 32, unsigned: false }, nullable: false },
                Column {
                    name: "name".to_string(),
                    column_type: ColumnType::VarString { length: 32, charset: Charset::default() },
                    nullable: true,
                },
            ],
            charset: Charset::default(),
        }
    }

    #[test]
    fn decode_soundness_column_count_and_types_match_tracked_table() {
        let row = vec![CellValue::Int32(42), CellValue::String("x".to_string())];
        let decoded = decode_row(&table(), "d", &row).unwrap();
        assert_eq!(decoded.get("id"), Some(&Value::Int(42)));
        assert_eq!(decoded.get("name"), Some(&Value::String("x".to_string())));
    }

    #[test]
    fn decode_type_mismatch_raises_column_cast_error() {
        let row = vec![CellValue::String("oops".to_string()), CellValue::String("x".to_string())];
        let err = decode_row(&table(), "d", &row).unwrap_err();
        assert_eq!(err.column, "id");
        assert_eq!(err.table, "u");
    }

    #[test]
    fn short_row_image_skips_trailing_columns() {
        let row = vec![CellValue::Int32(1)];
        let decoded = decode_row(&table(), "d", &row).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(!decoded.contains_key("name"));
    }
}
