use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;

use switchvault::config::ServerConfig;
use switchvault::db;
use switchvault::db::entities::device;
use switchvault::db::services::config_service;
use switchvault::db::services::device_service::NewDevice;
use switchvault::db::services::event_service::{EventFilter, EventKind, NewEvent};
use switchvault::scheduler::JobRunner;
use switchvault::server::engine::Engine;
use switchvault::server::event_broadcaster::{EngineEvent, EventBroadcaster};
use switchvault::services::encryption_service::SecretCipher;
use switchvault::workers::{CancelFlag, JobKind};

/// Stand-in for the SSH worker: "captures" a canned configuration and
/// records the outcome the way the real runner does.
struct CannedBackupRunner {
    db: DatabaseConnection,
    events: EventBroadcaster,
    config_text: String,
}

#[async_trait]
impl JobRunner for CannedBackupRunner {
    async fn run(&self, device: device::Model, kind: JobKind, _cancel: CancelFlag) {
        assert_eq!(kind, JobKind::Backup);
        let (version, changed) =
            config_service::append_version(&self.db, device.id, &self.config_text, Utc::now())
                .await
                .unwrap();
        let (kind_out, detail) = if changed {
            (EventKind::Success, format!("stored configuration version {}", version.id))
        } else {
            (EventKind::SuccessNoChange, "configuration unchanged".to_string())
        };
        self.events
            .record(
                &self.db,
                NewEvent {
                    device_id: Some(device.id),
                    job_kind: Some(kind),
                    kind: kind_out,
                    detail,
                    duration_ms: Some(5),
                },
            )
            .await
            .unwrap();
    }
}

fn test_engine(db: &DatabaseConnection, config_text: &str) -> Arc<Engine> {
    let cfg = ServerConfig::for_tests();
    let crypto = SecretCipher::from_hex_key(&cfg.encryption_key).unwrap();
    let events = EventBroadcaster::default();
    let runner = Arc::new(CannedBackupRunner {
        db: db.clone(),
        events: events.clone(),
        config_text: config_text.into(),
    });
    Engine::with_runner(db.clone(), cfg, crypto, events, runner)
}

fn device_spec() -> NewDevice {
    NewDevice {
        name: "edge-sw7".into(),
        host: "192.0.2.7".into(),
        vendor: "arista-eos".into(),
        shell_username: "netops".into(),
        shell_password: "hunter2".into(),
        snmp_community: "ops".into(),
        snmp_port: 161,
    }
}

#[tokio::test]
async fn add_device_then_run_now_yields_one_version_and_one_success_event() {
    let db = db::connect_for_tests().await;
    let engine = test_engine(&db, "hostname edge-sw7\nvlan 10\n");

    let device = engine.add_device(device_spec()).await.unwrap();
    let mut subscription = engine.subscribe();

    engine.trigger_backup_now(device.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let history = engine.get_config_history(device.id, None).await.unwrap();
    assert_eq!(history.len(), 1);

    let events = engine
        .get_events(EventFilter {
            device_id: Some(device.id),
            kind: Some("success".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);

    // The subscriber saw the same record pushed live.
    let pushed = subscription.try_recv().expect("event pushed to subscribers");
    match pushed {
        EngineEvent::Event { record } => {
            assert_eq!(record.device_id, Some(device.id));
            assert_eq!(record.kind, "success");
        }
        other => panic!("unexpected push message: {other:?}"),
    }
}

#[tokio::test]
async fn rerunning_an_unchanged_backup_deduplicates() {
    let db = db::connect_for_tests().await;
    let engine = test_engine(&db, "hostname edge-sw7\n");

    let device = engine.add_device(device_spec()).await.unwrap();

    engine.trigger_backup_now(device.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    engine.trigger_backup_now(device.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;

    // Still a single stored version, but both attempts are in the log.
    let history = engine.get_config_history(device.id, None).await.unwrap();
    assert_eq!(history.len(), 1);

    let no_change = engine
        .get_events(EventFilter {
            device_id: Some(device.id),
            kind: Some("success_no_change".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(no_change.len(), 1);
}

#[tokio::test]
async fn trigger_on_unknown_device_is_rejected() {
    let db = db::connect_for_tests().await;
    let engine = test_engine(&db, "x");

    let err = engine.trigger_backup_now(4242).await;
    assert!(err.is_err());

    let removed = engine.add_device(device_spec()).await.unwrap();
    engine.remove_device(removed.id).await.unwrap();
    let err = engine.trigger_backup_now(removed.id).await;
    assert!(err.is_err());
}
