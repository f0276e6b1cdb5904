//! High-level data access API. Encapsulates all query logic so the rest of
//! the engine (scheduler, workers, web handlers) works with domain models
//! without touching the schema directly. One sub-module per store.

pub mod config_service;
pub mod device_service;
pub mod event_service;
pub mod metric_service;
pub mod schedule_service;

pub use config_service::*;
pub use device_service::*;
pub use event_service::*;
pub use metric_service::*;
pub use schedule_service::*;
