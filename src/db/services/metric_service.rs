use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::db::entities::metric_sample;

/// One polled value on its way into the store.
#[derive(Clone, Debug)]
pub struct NewSample {
    pub metric: String,
    pub value: JsonValue,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct MetricQuery {
    pub metric: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
}

/// Stores a poll cycle's samples in one transaction so a cancelled or
/// crashed worker never leaves a half-written batch behind.
pub async fn insert_samples(
    db: &DatabaseConnection,
    device_id: i32,
    time: DateTime<Utc>,
    samples: Vec<NewSample>,
) -> Result<usize, DbErr> {
    if samples.is_empty() {
        return Ok(0);
    }
    let count = samples.len();
    let models: Vec<metric_sample::ActiveModel> = samples
        .into_iter()
        .map(|s| metric_sample::ActiveModel {
            device_id: Set(device_id),
            time: Set(time),
            metric: Set(s.metric),
            value: Set(s.value),
            ..Default::default()
        })
        .collect();

    let txn = db.begin().await?;
    metric_sample::Entity::insert_many(models).exec(&txn).await?;
    txn.commit().await?;
    Ok(count)
}

/// Samples for a device, newest first.
pub async fn query_samples(
    db: &DatabaseConnection,
    device_id: i32,
    query: MetricQuery,
) -> Result<Vec<metric_sample::Model>, DbErr> {
    let mut find = metric_sample::Entity::find()
        .filter(metric_sample::Column::DeviceId.eq(device_id));
    if let Some(metric) = query.metric {
        find = find.filter(metric_sample::Column::Metric.eq(metric));
    }
    if let Some(from) = query.from {
        find = find.filter(metric_sample::Column::Time.gte(from));
    }
    if let Some(to) = query.to {
        find = find.filter(metric_sample::Column::Time.lte(to));
    }
    find.order_by_desc(metric_sample::Column::Time)
        .order_by_desc(metric_sample::Column::Id)
        .limit(query.limit.unwrap_or(1000))
        .all(db)
        .await
}

/// Evicts the oldest samples of a device down to `retain` rows. Eviction
/// only ever removes from the old end, so the ordering of survivors is
/// untouched.
pub async fn prune_samples(
    db: &DatabaseConnection,
    device_id: i32,
    retain: u64,
) -> Result<u64, DbErr> {
    let total = metric_sample::Entity::find()
        .filter(metric_sample::Column::DeviceId.eq(device_id))
        .count(db)
        .await?;
    if total <= retain {
        return Ok(0);
    }
    let excess = total - retain;

    let victims: Vec<i32> = metric_sample::Entity::find()
        .select_only()
        .column(metric_sample::Column::Id)
        .filter(metric_sample::Column::DeviceId.eq(device_id))
        .order_by_asc(metric_sample::Column::Time)
        .order_by_asc(metric_sample::Column::Id)
        .limit(excess)
        .into_tuple()
        .all(db)
        .await?;

    let deleted = metric_sample::Entity::delete_many()
        .filter(metric_sample::Column::Id.is_in(victims))
        .exec(db)
        .await?
        .rows_affected;

    debug!(device_id, deleted, "Evicted old metric samples.");
    Ok(deleted)
}
