pub mod config_routes;
pub mod device_routes;
pub mod event_routes;
pub mod metric_routes;
pub mod schedule_routes;
