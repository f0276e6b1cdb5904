use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A recurring job definition. Several entries may target the same
/// (device, job-kind) pair; the scheduler's execution slots still
/// serialize their runs.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schedule_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub device_id: i32,
    /// `backup` or `poll`.
    pub job_kind: String,
    /// `interval` or `daily`.
    pub trigger_kind: String,
    pub interval_seconds: Option<i64>,
    pub daily_hour: Option<i32>,
    pub daily_minute: Option<i32>,
    pub enabled: bool,
    pub last_run_at: Option<ChronoDateTimeUtc>,
    pub next_due_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id"
    )]
    Device,
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
