use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One captured device configuration. Immutable once written; versions for
/// a device are totally ordered by `captured_at` (id breaks ties).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "config_versions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub device_id: i32,
    pub captured_at: ChronoDateTimeUtc,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    /// SHA-256 of `content`, hex. Lets the store skip byte-identical
    /// captures instead of growing the chain.
    pub content_hash: String,
    /// Predecessor in the device's version chain; None for the first.
    pub parent_id: Option<i32>,
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
