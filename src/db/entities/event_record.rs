use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only job/outcome log. Nothing in the service layer mutates or
/// deletes rows of this table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "event_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub time: ChronoDateTimeUtc,
    pub device_id: Option<i32>,
    /// `backup` or `poll`; None for engine-level events.
    pub job_kind: Option<String>,
    pub kind: String,
    #[sea_orm(column_type = "Text")]
    pub detail: String,
    pub duration_ms: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
