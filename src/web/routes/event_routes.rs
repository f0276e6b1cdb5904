use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::db::entities::event_record;
use crate::db::services::event_service::EventFilter;
use crate::server::engine::Engine;
use crate::web::error::AppError;

async fn events_handler(
    State(engine): State<Arc<Engine>>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<Vec<event_record::Model>>, AppError> {
    Ok(Json(engine.get_events(filter).await?))
}

pub fn event_router() -> Router<Arc<Engine>> {
    Router::new().route("/", get(events_handler))
}
