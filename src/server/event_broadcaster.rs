use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::entities::event_record;
use crate::db::services::event_service::{self, NewEvent};

/// Push messages for subscribed presentation-layer clients.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Event { record: event_record::Model },
    DeviceStatus { device_id: i32, status: String },
    MetricBatch { device_id: i32, count: usize },
}

impl EngineEvent {
    /// The event-kind string a `?kind=` subscription filter matches on.
    pub fn kind_label(&self) -> &str {
        match self {
            EngineEvent::Event { record } => record.kind.as_str(),
            EngineEvent::DeviceStatus { .. } => "device_status",
            EngineEvent::MetricBatch { .. } => "metric_batch",
        }
    }
}

/// Fans engine events out to every subscriber (WebSocket clients, tests).
/// Sending to zero receivers is normal and only logged at debug.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBroadcaster { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("No subscribers for engine event: {e}");
        }
    }

    /// Appends to the event log and pushes the stored record to
    /// subscribers in one step, so the log and the live feed never
    /// disagree.
    pub async fn record(
        &self,
        db: &DatabaseConnection,
        event: NewEvent,
    ) -> Result<event_record::Model, DbErr> {
        let record = event_service::record_event(db, event).await?;
        self.publish(EngineEvent::Event { record: record.clone() });
        Ok(record)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        EventBroadcaster::new(256)
    }
}
