use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::db::services::device_service::RegistryError;
use crate::db::services::schedule_service::ScheduleError;
use crate::scheduler::DispatchError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {msg}"),
            ),
            AppError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => AppError::InvalidInput(msg),
            RegistryError::NotFound(id) => AppError::NotFound(format!("device {id} not found")),
            RegistryError::Conflict(msg) => AppError::Conflict(msg),
            RegistryError::Crypto(msg) => AppError::InternalServerError(msg),
            RegistryError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Validation(msg) => AppError::InvalidInput(msg),
            ScheduleError::NotFound(id) => {
                AppError::NotFound(format!("schedule entry {id} not found"))
            }
            ScheduleError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Busy { device_id, kind } => AppError::Conflict(format!(
                "a {kind} job for device {device_id} is already running"
            )),
            DispatchError::DeviceNotFound(id) => {
                AppError::NotFound(format!("device {id} not found"))
            }
            DispatchError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}
