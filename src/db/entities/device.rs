use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A managed switch. Credentials are stored sealed (AES-GCM, hex) and are
/// only opened by the workers; API responses never carry them.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub host: String,
    /// Vendor dialect tag, e.g. `cisco-ios`. Validated at registry time.
    pub vendor: String,
    pub shell_username: String,
    #[serde(skip_serializing)]
    pub shell_password_enc: String,
    #[serde(skip_serializing)]
    pub snmp_community_enc: String,
    pub snmp_port: i32,
    pub enabled: bool,
    /// Soft delete: the row never leaves the table so version/event
    /// lineage stays intact.
    pub deleted: bool,
    /// Last observed reachability: `online` / `offline` / `unknown`.
    pub status: String,
    pub last_backup_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::config_version::Entity")]
    ConfigVersion,
    #[sea_orm(has_many = "super::metric_sample::Entity")]
    MetricSample,
    #[sea_orm(has_many = "super::schedule_entry::Entity")]
    ScheduleEntry,
}

impl Related<super::config_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConfigVersion.def()
    }
}

impl Related<super::metric_sample::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MetricSample.def()
    }
}

impl Related<super::schedule_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduleEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
