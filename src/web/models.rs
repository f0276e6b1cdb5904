use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::entities::device;

/// Device as exposed to the presentation layer: identity and state, never
/// credentials.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: i32,
    pub name: String,
    pub host: String,
    pub vendor: String,
    pub snmp_port: i32,
    pub enabled: bool,
    pub status: String,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<device::Model> for DeviceSummary {
    fn from(model: device::Model) -> Self {
        DeviceSummary {
            id: model.id,
            name: model.name,
            host: model.host,
            vendor: model.vendor,
            snmp_port: model.snmp_port,
            enabled: model.enabled,
            status: model.status,
            last_backup_at: model.last_backup_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
