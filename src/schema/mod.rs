//! 스키마 추적기: 카탈로그 스냅샷, DDL 델타, 영속 스토어.

pub mod delta;
pub mod introspect;
pub mod model;
pub mod store;

use crate::error::Result;
use async_trait::async_trait;

pub use delta::{SchemaDelta, SoftFailure};
pub use introspect::capture_schema;
pub use model::{Charset, Column, ColumnType, Database, Schema, Table, TemporalKind, Value};
pub use store::{SchemaStore, SnapshotId};

/// 라이브 업스트림 카탈로그에서 단일 테이블 정의를 다시 읽어오는 협력자.
/// 리플리케이터가 `ColumnCastError`를 만났을 때 추적 중인 정의와 실제
/// 카탈로그가 갈라졌는지 확인하는 데 쓰인다 (spec §4.F).
#[async_trait]
pub trait TableIntrospector: Send + Sync {
    async fn introspect_table(&self, database: &str, table: &str) -> Result<Table>;
}
