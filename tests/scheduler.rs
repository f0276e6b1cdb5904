use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};

use switchvault::db;
use switchvault::db::entities::{device, schedule_entry};
use switchvault::db::services::device_service::{self, NewDevice};
use switchvault::db::services::event_service::{self, EventFilter};
use switchvault::db::services::schedule_service::{self, NewSchedule};
use switchvault::scheduler::trigger::Trigger;
use switchvault::scheduler::{DispatchError, JobRunner, Scheduler, SlotTable};
use switchvault::server::event_broadcaster::EventBroadcaster;
use switchvault::services::encryption_service::SecretCipher;
use switchvault::workers::{CancelFlag, JobKind};

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Runner that just sleeps, tracking how many runs overlap.
struct SlowRunner {
    delay: Duration,
    current: AtomicUsize,
    max_overlap: AtomicUsize,
    total_runs: AtomicUsize,
}

impl SlowRunner {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(SlowRunner {
            delay,
            current: AtomicUsize::new(0),
            max_overlap: AtomicUsize::new(0),
            total_runs: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl JobRunner for SlowRunner {
    async fn run(&self, _device: device::Model, _kind: JobKind, _cancel: CancelFlag) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_overlap.fetch_max(now, Ordering::SeqCst);
        self.total_runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn device_fixture(db: &sea_orm::DatabaseConnection, name: &str, host: &str) -> device::Model {
    let crypto = SecretCipher::from_hex_key(KEY).unwrap();
    device_service::create_device(
        db,
        &crypto,
        NewDevice {
            name: name.into(),
            host: host.into(),
            vendor: "cisco-ios".into(),
            shell_username: "admin".into(),
            shell_password: "secret".into(),
            snmp_community: "public".into(),
            snmp_port: 161,
        },
    )
    .await
    .unwrap()
}

fn scheduler_with(db: &sea_orm::DatabaseConnection, runner: Arc<dyn JobRunner>) -> Scheduler {
    Scheduler::new(
        db.clone(),
        runner,
        SlotTable::new(),
        EventBroadcaster::default(),
        4,
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn manual_triggers_respect_the_execution_slot() {
    let db = db::connect_for_tests().await;
    let device = device_fixture(&db, "sw1", "10.0.0.2").await;
    let runner = SlowRunner::new(Duration::from_millis(300));
    let scheduler = scheduler_with(&db, runner.clone());

    scheduler.run_now(device.id, JobKind::Backup).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second trigger while the first is in flight: busy, logged skipped.
    let busy = scheduler.run_now(device.id, JobKind::Backup).await;
    assert!(matches!(busy, Err(DispatchError::Busy { .. })));

    // A different job kind for the same device is its own slot.
    scheduler.run_now(device.id, JobKind::Poll).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(runner.total_runs.load(Ordering::SeqCst), 2);

    let skipped = event_service::query_events(
        &db,
        EventFilter { kind: Some("skipped".into()), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].device_id, Some(device.id));

    // Slot released after completion: the next trigger goes through.
    scheduler.run_now(device.id, JobKind::Backup).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runner.total_runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn backup_runs_for_one_device_never_overlap() {
    let db = db::connect_for_tests().await;
    let device = device_fixture(&db, "sw1", "10.0.0.2").await;
    let runner = SlowRunner::new(Duration::from_millis(150));
    let scheduler = Arc::new(scheduler_with(&db, runner.clone()));

    for _ in 0..5 {
        let _ = scheduler.run_now(device.id, JobKind::Backup).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(runner.max_overlap.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn different_devices_run_in_parallel() {
    let db = db::connect_for_tests().await;
    let sw1 = device_fixture(&db, "sw1", "10.0.0.2").await;
    let sw2 = device_fixture(&db, "sw2", "10.0.0.3").await;
    let runner = SlowRunner::new(Duration::from_millis(200));
    let scheduler = scheduler_with(&db, runner.clone());

    scheduler.run_now(sw1.id, JobKind::Backup).await.unwrap();
    scheduler.run_now(sw2.id, JobKind::Backup).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(runner.max_overlap.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missed_tick_is_skipped_and_advances_due_by_one_period() {
    let db = db::connect_for_tests().await;
    let device = device_fixture(&db, "sw1", "10.0.0.2").await;
    let runner = SlowRunner::new(Duration::from_millis(500));
    let scheduler = scheduler_with(&db, runner.clone());

    let entry = schedule_service::create_schedule(
        &db,
        NewSchedule {
            device_id: device.id,
            job_kind: JobKind::Backup,
            trigger: Trigger::Interval { seconds: 300 },
            enabled: true,
        },
    )
    .await
    .unwrap();

    // Force the entry overdue at a known instant.
    let old_due = Utc::now() - ChronoDuration::seconds(1);
    let mut active = entry.clone().into_active_model();
    active.next_due_at = Set(Some(old_due));
    active.update(&db).await.unwrap();

    // First tick dispatches the run.
    scheduler.run_tick().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.total_runs.load(Ordering::SeqCst), 1);

    // Second tick while the run is still in flight: skipped, and the due
    // time moves exactly one period past the old due time.
    scheduler.run_tick().await;

    let skipped = event_service::query_events(
        &db,
        EventFilter { kind: Some("skipped".into()), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(skipped.len(), 1);

    let reloaded = schedule_entry::Entity::find_by_id(entry.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.next_due_at, Some(old_due + ChronoDuration::seconds(300)));
    // Not yet completed, so no last-run timestamp.
    assert_eq!(reloaded.last_run_at, None);

    // After completion the bookkeeping is recomputed from the finish time.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let finished = schedule_entry::Entity::find_by_id(entry.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    let last_run = finished.last_run_at.expect("completion recorded");
    assert_eq!(finished.next_due_at, Some(last_run + ChronoDuration::seconds(300)));
}

#[tokio::test]
async fn disabled_entries_and_devices_are_not_evaluated() {
    let db = db::connect_for_tests().await;
    let device = device_fixture(&db, "sw1", "10.0.0.2").await;
    let runner = SlowRunner::new(Duration::from_millis(10));
    let scheduler = scheduler_with(&db, runner.clone());

    let entry = schedule_service::create_schedule(
        &db,
        NewSchedule {
            device_id: device.id,
            job_kind: JobKind::Poll,
            trigger: Trigger::Interval { seconds: 60 },
            enabled: true,
        },
    )
    .await
    .unwrap();
    let mut active = entry.clone().into_active_model();
    active.next_due_at = Set(Some(Utc::now() - ChronoDuration::seconds(5)));
    active.update(&db).await.unwrap();

    // Disabling the entry removes it from due evaluation.
    schedule_service::set_enabled(&db, entry.id, false).await.unwrap();
    scheduler.run_tick().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.total_runs.load(Ordering::SeqCst), 0);

    // Re-enabling recomputes next-due from now, so nothing fires yet.
    let reenabled = schedule_service::set_enabled(&db, entry.id, true).await.unwrap();
    assert!(reenabled.next_due_at.unwrap() > Utc::now());
    scheduler.run_tick().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.total_runs.load(Ordering::SeqCst), 0);
}
