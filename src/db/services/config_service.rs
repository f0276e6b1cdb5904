use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::db::entities::config_version;

/// History row without the (potentially large) configuration text.
#[derive(FromQueryResult, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVersionSummary {
    pub id: i32,
    pub device_id: i32,
    pub captured_at: DateTime<Utc>,
    pub content_hash: String,
    pub parent_id: Option<i32>,
}

pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Appends a captured configuration. If the content hash matches the
/// current latest version the store is left untouched and the existing
/// row is returned with `false` — the original capture time is preserved,
/// never re-stamped.
pub async fn append_version(
    db: &DatabaseConnection,
    device_id: i32,
    raw_text: &str,
    captured_at: DateTime<Utc>,
) -> Result<(config_version::Model, bool), DbErr> {
    let hash = content_hash(raw_text);

    let latest = latest_version(db, device_id).await?;
    if let Some(latest) = latest {
        if latest.content_hash == hash {
            debug!(device_id, version_id = latest.id, "Configuration unchanged, skipping append.");
            return Ok((latest, false));
        }
        let inserted = config_version::ActiveModel {
            device_id: Set(device_id),
            captured_at: Set(captured_at),
            content: Set(raw_text.to_string()),
            content_hash: Set(hash),
            parent_id: Set(Some(latest.id)),
            ..Default::default()
        }
        .insert(db)
        .await?;
        return Ok((inserted, true));
    }

    let inserted = config_version::ActiveModel {
        device_id: Set(device_id),
        captured_at: Set(captured_at),
        content: Set(raw_text.to_string()),
        content_hash: Set(hash),
        parent_id: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok((inserted, true))
}

pub async fn latest_version(
    db: &DatabaseConnection,
    device_id: i32,
) -> Result<Option<config_version::Model>, DbErr> {
    config_version::Entity::find()
        .filter(config_version::Column::DeviceId.eq(device_id))
        .order_by_desc(config_version::Column::CapturedAt)
        .order_by_desc(config_version::Column::Id)
        .one(db)
        .await
}

/// Version history, newest first. Content is excluded so iterating a long
/// chain stays cheap; fetch the body with [`get_version`].
pub async fn version_history(
    db: &DatabaseConnection,
    device_id: i32,
    limit: Option<u64>,
) -> Result<Vec<ConfigVersionSummary>, DbErr> {
    let mut query = config_version::Entity::find()
        .select_only()
        .column(config_version::Column::Id)
        .column(config_version::Column::DeviceId)
        .column(config_version::Column::CapturedAt)
        .column(config_version::Column::ContentHash)
        .column(config_version::Column::ParentId)
        .filter(config_version::Column::DeviceId.eq(device_id))
        .order_by_desc(config_version::Column::CapturedAt)
        .order_by_desc(config_version::Column::Id);
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    query.into_model::<ConfigVersionSummary>().all(db).await
}

pub async fn get_version(
    db: &DatabaseConnection,
    version_id: i32,
) -> Result<Option<config_version::Model>, DbErr> {
    config_version::Entity::find_by_id(version_id).one(db).await
}
