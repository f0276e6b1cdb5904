use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::entities::config_version;
use crate::db::services::config_service::ConfigVersionSummary;
use crate::server::engine::Engine;
use crate::web::error::AppError;

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u64>,
}

async fn config_history_handler(
    State(engine): State<Arc<Engine>>,
    Path(device_id): Path<i32>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ConfigVersionSummary>>, AppError> {
    Ok(Json(engine.get_config_history(device_id, query.limit).await?))
}

async fn config_version_handler(
    State(engine): State<Arc<Engine>>,
    Path(version_id): Path<i32>,
) -> Result<Json<config_version::Model>, AppError> {
    match engine.get_config_version(version_id).await? {
        Some(version) => Ok(Json(version)),
        None => Err(AppError::NotFound(format!(
            "config version {version_id} not found"
        ))),
    }
}

pub fn config_router() -> Router<Arc<Engine>> {
    Router::new()
        .route("/devices/{id}/config-history", get(config_history_handler))
        .route("/config-versions/{id}", get(config_version_handler))
}
