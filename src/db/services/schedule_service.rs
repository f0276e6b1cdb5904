use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::db::entities::schedule_entry;
use crate::scheduler::trigger::Trigger;
use crate::workers::JobKind;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule: {0}")]
    Validation(String),
    #[error("schedule entry {0} not found")]
    NotFound(i32),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewSchedule {
    pub device_id: i32,
    pub job_kind: JobKind,
    pub trigger: Trigger,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn create_schedule(
    db: &DatabaseConnection,
    spec: NewSchedule,
) -> Result<schedule_entry::Model, ScheduleError> {
    spec.trigger.validate().map_err(ScheduleError::Validation)?;

    let next_due = if spec.enabled {
        Some(spec.trigger.next_after(Utc::now()))
    } else {
        None
    };
    let (trigger_kind, interval_seconds, daily_hour, daily_minute) = spec.trigger.columns();

    let model = schedule_entry::ActiveModel {
        device_id: Set(spec.device_id),
        job_kind: Set(spec.job_kind.as_str().to_string()),
        trigger_kind: Set(trigger_kind.to_string()),
        interval_seconds: Set(interval_seconds),
        daily_hour: Set(daily_hour),
        daily_minute: Set(daily_minute),
        enabled: Set(spec.enabled),
        last_run_at: Set(None),
        next_due_at: Set(next_due),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(schedule_id = model.id, device_id = model.device_id, kind = %model.job_kind, "Created schedule entry.");
    Ok(model)
}

pub async fn list_schedules(
    db: &DatabaseConnection,
    device_id: Option<i32>,
) -> Result<Vec<schedule_entry::Model>, DbErr> {
    let mut query = schedule_entry::Entity::find();
    if let Some(device_id) = device_id {
        query = query.filter(schedule_entry::Column::DeviceId.eq(device_id));
    }
    query
        .order_by_asc(schedule_entry::Column::Id)
        .all(db)
        .await
}

/// Entries the tick loop should consider: enabled and with their device
/// still enabled and not deleted.
pub async fn due_candidates(
    db: &DatabaseConnection,
) -> Result<Vec<schedule_entry::Model>, DbErr> {
    use crate::db::entities::device;

    let enabled_entries = schedule_entry::Entity::find()
        .filter(schedule_entry::Column::Enabled.eq(true))
        .all(db)
        .await?;
    if enabled_entries.is_empty() {
        return Ok(enabled_entries);
    }

    let device_ids: Vec<i32> = enabled_entries.iter().map(|e| e.device_id).collect();
    let live_devices: Vec<i32> = device::Entity::find()
        .filter(device::Column::Id.is_in(device_ids))
        .filter(device::Column::Enabled.eq(true))
        .filter(device::Column::Deleted.eq(false))
        .all(db)
        .await?
        .into_iter()
        .map(|d| d.id)
        .collect();

    Ok(enabled_entries
        .into_iter()
        .filter(|e| live_devices.contains(&e.device_id))
        .collect())
}

pub async fn set_enabled(
    db: &DatabaseConnection,
    schedule_id: i32,
    enabled: bool,
) -> Result<schedule_entry::Model, ScheduleError> {
    let entry = schedule_entry::Entity::find_by_id(schedule_id)
        .one(db)
        .await?
        .ok_or(ScheduleError::NotFound(schedule_id))?;

    let trigger = Trigger::from_entry(&entry).map_err(ScheduleError::Validation)?;
    let mut active = entry.into_active_model();
    active.enabled = Set(enabled);
    // Re-enabling restarts the cadence from now instead of firing a
    // backlog of missed periods.
    active.next_due_at = Set(if enabled {
        Some(trigger.next_after(Utc::now()))
    } else {
        None
    });
    Ok(active.update(db).await?)
}

pub async fn delete_schedule(
    db: &DatabaseConnection,
    schedule_id: i32,
) -> Result<(), ScheduleError> {
    let result = schedule_entry::Entity::delete_by_id(schedule_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(ScheduleError::NotFound(schedule_id));
    }
    Ok(())
}

/// Bookkeeping after a completed run: last-run is the completion time and
/// the next due instant is computed from it.
pub async fn mark_completed(
    db: &DatabaseConnection,
    schedule_id: i32,
    completed_at: DateTime<Utc>,
) -> Result<(), ScheduleError> {
    let entry = schedule_entry::Entity::find_by_id(schedule_id)
        .one(db)
        .await?
        .ok_or(ScheduleError::NotFound(schedule_id))?;
    let trigger = Trigger::from_entry(&entry).map_err(ScheduleError::Validation)?;

    let mut active = entry.into_active_model();
    active.last_run_at = Set(Some(completed_at));
    active.next_due_at = Set(Some(trigger.next_after(completed_at)));
    active.update(db).await?;
    Ok(())
}

/// Bookkeeping for a missed tick: the due time advances by exactly one
/// trigger period from the old due time, not by the overrun.
pub async fn mark_skipped(
    db: &DatabaseConnection,
    schedule_id: i32,
) -> Result<(), ScheduleError> {
    let entry = schedule_entry::Entity::find_by_id(schedule_id)
        .one(db)
        .await?
        .ok_or(ScheduleError::NotFound(schedule_id))?;
    let trigger = Trigger::from_entry(&entry).map_err(ScheduleError::Validation)?;

    let old_due = entry.next_due_at.unwrap_or_else(Utc::now);
    let mut active = entry.into_active_model();
    active.next_due_at = Set(Some(trigger.next_after(old_due)));
    active.update(db).await?;
    Ok(())
}

/// Fills in a due time for entries that have never been evaluated
/// (fresh rows or rows from an older database).
pub async fn bootstrap_due_time(
    db: &DatabaseConnection,
    entry: &schedule_entry::Model,
) -> Result<DateTime<Utc>, ScheduleError> {
    let trigger = Trigger::from_entry(entry).map_err(ScheduleError::Validation)?;
    let due = trigger.next_after(Utc::now());
    let mut active = entry.clone().into_active_model();
    active.next_due_at = Set(Some(due));
    active.update(db).await?;
    Ok(due)
}
