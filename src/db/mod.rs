pub mod entities;
pub mod services;

use sea_orm::sea_query::Index;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema,
};
use tracing::info;

use entities::{config_version, device, event_record, metric_sample, schedule_entry};

pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    if database_url.contains(":memory:") {
        // A pooled in-memory SQLite would give every connection its own
        // empty database.
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(10);
    }
    Database::connect(opt).await
}

/// Creates tables and secondary indexes if they do not exist yet. Runs at
/// every startup; the schema is derived from the entity definitions.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut device_table = schema.create_table_from_entity(device::Entity);
    db.execute(builder.build(device_table.if_not_exists())).await?;

    let mut version_table = schema.create_table_from_entity(config_version::Entity);
    db.execute(builder.build(version_table.if_not_exists())).await?;

    let mut sample_table = schema.create_table_from_entity(metric_sample::Entity);
    db.execute(builder.build(sample_table.if_not_exists())).await?;

    let mut event_table = schema.create_table_from_entity(event_record::Entity);
    db.execute(builder.build(event_table.if_not_exists())).await?;

    let mut schedule_table = schema.create_table_from_entity(schedule_entry::Entity);
    db.execute(builder.build(schedule_table.if_not_exists())).await?;

    // Hot query paths: history by device/time, events by device/kind/time,
    // samples by device/metric/time.
    let indexes = [
        Index::create()
            .name("idx_config_versions_device_time")
            .table(config_version::Entity)
            .col(config_version::Column::DeviceId)
            .col(config_version::Column::CapturedAt)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_event_records_device_time")
            .table(event_record::Entity)
            .col(event_record::Column::DeviceId)
            .col(event_record::Column::Time)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_event_records_kind_time")
            .table(event_record::Entity)
            .col(event_record::Column::Kind)
            .col(event_record::Column::Time)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_metric_samples_device_metric_time")
            .table(metric_sample::Entity)
            .col(metric_sample::Column::DeviceId)
            .col(metric_sample::Column::Metric)
            .col(metric_sample::Column::Time)
            .if_not_exists()
            .to_owned(),
    ];
    for index in indexes {
        db.execute(builder.build(&index)).await?;
    }

    info!("Database schema initialized.");
    Ok(())
}

/// Convenience used by tests: fresh in-memory database with the full schema.
pub async fn connect_for_tests() -> DatabaseConnection {
    let db = connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect");
    init_schema(&db).await.expect("schema init should succeed");
    db
}
