use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};

use crate::db::entities::event_record;
use crate::workers::JobKind;

/// Outcome classes recorded in the event log.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Success,
    SuccessNoChange,
    Failure,
    Skipped,
    DeviceUnreachable,
    AuthFailure,
    PartialFailure,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Success => "success",
            EventKind::SuccessNoChange => "success_no_change",
            EventKind::Failure => "failure",
            EventKind::Skipped => "skipped",
            EventKind::DeviceUnreachable => "device_unreachable",
            EventKind::AuthFailure => "auth_failure",
            EventKind::PartialFailure => "partial_failure",
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewEvent {
    pub device_id: Option<i32>,
    pub job_kind: Option<JobKind>,
    pub kind: EventKind,
    pub detail: String,
    pub duration_ms: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EventFilter {
    pub device_id: Option<i32>,
    pub kind: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
}

/// Appends one record. This is the only write path for the events table;
/// nothing updates or deletes rows.
pub async fn record_event(
    db: &DatabaseConnection,
    event: NewEvent,
) -> Result<event_record::Model, DbErr> {
    event_record::ActiveModel {
        time: Set(Utc::now()),
        device_id: Set(event.device_id),
        job_kind: Set(event.job_kind.map(|k| k.as_str().to_string())),
        kind: Set(event.kind.as_str().to_string()),
        detail: Set(event.detail),
        duration_ms: Set(event.duration_ms),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// Filtered query, newest first, served by the (device, time) and
/// (kind, time) indexes.
pub async fn query_events(
    db: &DatabaseConnection,
    filter: EventFilter,
) -> Result<Vec<event_record::Model>, DbErr> {
    let mut query = event_record::Entity::find();
    if let Some(device_id) = filter.device_id {
        query = query.filter(event_record::Column::DeviceId.eq(device_id));
    }
    if let Some(kind) = filter.kind {
        query = query.filter(event_record::Column::Kind.eq(kind));
    }
    if let Some(from) = filter.from {
        query = query.filter(event_record::Column::Time.gte(from));
    }
    if let Some(to) = filter.to {
        query = query.filter(event_record::Column::Time.lte(to));
    }
    query
        .order_by_desc(event_record::Column::Time)
        .order_by_desc(event_record::Column::Id)
        .limit(filter.limit.unwrap_or(200))
        .all(db)
        .await
}
