use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::db::entities::metric_sample;
use crate::db::services::metric_service::MetricQuery;
use crate::server::engine::Engine;
use crate::web::error::AppError;

async fn metrics_handler(
    State(engine): State<Arc<Engine>>,
    Path(device_id): Path<i32>,
    Query(query): Query<MetricQuery>,
) -> Result<Json<Vec<metric_sample::Model>>, AppError> {
    Ok(Json(engine.get_metrics(device_id, query).await?))
}

pub fn metric_router() -> Router<Arc<Engine>> {
    Router::new().route("/devices/{id}/metrics", get(metrics_handler))
}
