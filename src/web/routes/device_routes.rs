use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;

use crate::db::services::device_service::{DeviceFilter, DeviceUpdate, NewDevice};
use crate::server::engine::Engine;
use crate::web::error::AppError;
use crate::web::models::DeviceSummary;
use crate::workers::JobKind;

async fn list_devices_handler(
    State(engine): State<Arc<Engine>>,
    Query(filter): Query<DeviceFilter>,
) -> Result<Json<Vec<DeviceSummary>>, AppError> {
    let devices = engine.list_devices(filter).await?;
    Ok(Json(devices.into_iter().map(DeviceSummary::from).collect()))
}

async fn get_device_handler(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i32>,
) -> Result<Json<DeviceSummary>, AppError> {
    match engine.get_device(id).await? {
        Some(device) => Ok(Json(DeviceSummary::from(device))),
        None => Err(AppError::NotFound(format!("device {id} not found"))),
    }
}

async fn add_device_handler(
    State(engine): State<Arc<Engine>>,
    Json(spec): Json<NewDevice>,
) -> Result<(StatusCode, Json<DeviceSummary>), AppError> {
    let device = engine.add_device(spec).await?;
    Ok((StatusCode::CREATED, Json(DeviceSummary::from(device))))
}

async fn update_device_handler(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i32>,
    Json(update): Json<DeviceUpdate>,
) -> Result<Json<DeviceSummary>, AppError> {
    let device = engine.update_device(id, update).await?;
    Ok(Json(DeviceSummary::from(device)))
}

async fn remove_device_handler(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    engine.remove_device(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_backup_handler(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    engine.trigger_backup_now(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn trigger_poll_handler(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    engine.trigger_poll_now(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn cancel_job_handler(
    State(engine): State<Arc<Engine>>,
    Path((id, kind)): Path<(i32, String)>,
) -> Result<StatusCode, AppError> {
    let kind = JobKind::parse(&kind)
        .ok_or_else(|| AppError::InvalidInput(format!("unknown job kind '{kind}'")))?;
    if engine.cancel_job(id, kind) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(AppError::NotFound(format!(
            "no running {kind} job for device {id}"
        )))
    }
}

pub fn device_router() -> Router<Arc<Engine>> {
    Router::new()
        .route("/", get(list_devices_handler))
        .route("/", post(add_device_handler))
        .route("/{id}", get(get_device_handler))
        .route("/{id}", put(update_device_handler))
        .route("/{id}", delete(remove_device_handler))
        .route("/{id}/backup", post(trigger_backup_handler))
        .route("/{id}/poll", post(trigger_poll_handler))
        .route("/{id}/jobs/{kind}/cancel", post(cancel_job_handler))
}
