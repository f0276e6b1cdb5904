pub mod config_version;
pub mod device;
pub mod event_record;
pub mod metric_sample;
pub mod schedule_entry;
