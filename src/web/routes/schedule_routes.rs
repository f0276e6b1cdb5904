use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::entities::schedule_entry;
use crate::db::services::schedule_service::NewSchedule;
use crate::server::engine::Engine;
use crate::web::error::AppError;

#[derive(Deserialize)]
struct ScheduleListQuery {
    device_id: Option<i32>,
}

#[derive(Deserialize)]
struct SetEnabledRequest {
    enabled: bool,
}

async fn list_schedules_handler(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<ScheduleListQuery>,
) -> Result<Json<Vec<schedule_entry::Model>>, AppError> {
    Ok(Json(engine.list_schedules(query.device_id).await?))
}

async fn create_schedule_handler(
    State(engine): State<Arc<Engine>>,
    Json(spec): Json<NewSchedule>,
) -> Result<(StatusCode, Json<schedule_entry::Model>), AppError> {
    let entry = engine.create_schedule(spec).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn set_enabled_handler(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i32>,
    Json(request): Json<SetEnabledRequest>,
) -> Result<Json<schedule_entry::Model>, AppError> {
    Ok(Json(engine.set_schedule_enabled(id, request.enabled).await?))
}

async fn delete_schedule_handler(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    engine.delete_schedule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn schedule_router() -> Router<Arc<Engine>> {
    Router::new()
        .route("/", get(list_schedules_handler))
        .route("/", post(create_schedule_handler))
        .route("/{id}/enabled", put(set_enabled_handler))
        .route("/{id}", delete(delete_schedule_handler))
}
