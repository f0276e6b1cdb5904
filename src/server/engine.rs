use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::db::entities::{config_version, device, event_record, metric_sample, schedule_entry};
use crate::db::services::config_service::ConfigVersionSummary;
use crate::db::services::event_service::{EventFilter, EventKind, NewEvent};
use crate::db::services::{
    config_service, device_service, event_service, metric_service, schedule_service,
};
use crate::db::services::device_service::{DeviceFilter, DeviceUpdate, NewDevice, RegistryError};
use crate::db::services::metric_service::MetricQuery;
use crate::db::services::schedule_service::{NewSchedule, ScheduleError};
use crate::dialect;
use crate::scheduler::{DispatchError, JobRunner, Scheduler, SlotTable};
use crate::server::event_broadcaster::{EngineEvent, EventBroadcaster};
use crate::services::encryption_service::SecretCipher;
use crate::workers::{backup, monitor, BackupOutcome, CancelFlag, JobError, JobKind};

/// The engine: owns the stores, the scheduler and the broadcast feed, and
/// exposes the narrow command/query surface the presentation layer uses.
pub struct Engine {
    db: DatabaseConnection,
    cfg: ServerConfig,
    crypto: SecretCipher,
    events: EventBroadcaster,
    scheduler: Arc<Scheduler>,
    slots: SlotTable,
}

impl Engine {
    /// Wires the engine with the real SSH/SNMP runner.
    pub fn new(db: DatabaseConnection, cfg: ServerConfig) -> Result<Arc<Engine>, String> {
        let crypto = SecretCipher::from_hex_key(&cfg.encryption_key)?;
        let events = EventBroadcaster::default();
        let runner = Arc::new(EngineRunner {
            db: db.clone(),
            cfg: cfg.clone(),
            crypto: crypto.clone(),
            events: events.clone(),
            consecutive_poll_failures: DashMap::new(),
        });
        Ok(Self::with_runner(db, cfg, crypto, events, runner))
    }

    /// Wiring seam used by tests to swap in a stub runner.
    pub fn with_runner(
        db: DatabaseConnection,
        cfg: ServerConfig,
        crypto: SecretCipher,
        events: EventBroadcaster,
        runner: Arc<dyn JobRunner>,
    ) -> Arc<Engine> {
        let slots = SlotTable::new();
        let scheduler = Arc::new(Scheduler::new(
            db.clone(),
            runner,
            slots.clone(),
            events.clone(),
            cfg.worker_pool_size,
            Duration::from_secs(cfg.tick_seconds),
        ));
        Arc::new(Engine { db, cfg, crypto, events, scheduler, slots })
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn start_scheduler(&self) -> JoinHandle<()> {
        self.scheduler.spawn()
    }

    pub async fn run_tick(&self) {
        self.scheduler.run_tick().await
    }

    // --- registry commands ---

    pub async fn list_devices(&self, filter: DeviceFilter) -> Result<Vec<device::Model>, DbErr> {
        device_service::list_devices(&self.db, filter).await
    }

    pub async fn get_device(&self, id: i32) -> Result<Option<device::Model>, DbErr> {
        device_service::get_device(&self.db, id).await
    }

    pub async fn add_device(&self, spec: NewDevice) -> Result<device::Model, RegistryError> {
        device_service::create_device(&self.db, &self.crypto, spec).await
    }

    pub async fn update_device(
        &self,
        id: i32,
        update: DeviceUpdate,
    ) -> Result<device::Model, RegistryError> {
        device_service::update_device(&self.db, &self.crypto, id, update).await
    }

    pub async fn remove_device(&self, id: i32) -> Result<(), RegistryError> {
        device_service::remove_device(&self.db, id).await
    }

    // --- job commands ---

    pub async fn trigger_backup_now(&self, device_id: i32) -> Result<(), DispatchError> {
        self.scheduler.run_now(device_id, JobKind::Backup).await
    }

    pub async fn trigger_poll_now(&self, device_id: i32) -> Result<(), DispatchError> {
        self.scheduler.run_now(device_id, JobKind::Poll).await
    }

    /// Cancels the in-flight job, if any. The worker observes the flag,
    /// drops its session and releases the slot.
    pub fn cancel_job(&self, device_id: i32, kind: JobKind) -> bool {
        self.slots.cancel(device_id, kind)
    }

    pub fn job_running(&self, device_id: i32, kind: JobKind) -> bool {
        self.slots.is_held(device_id, kind)
    }

    // --- queries ---

    pub async fn get_config_history(
        &self,
        device_id: i32,
        limit: Option<u64>,
    ) -> Result<Vec<ConfigVersionSummary>, DbErr> {
        config_service::version_history(&self.db, device_id, limit).await
    }

    pub async fn get_config_version(
        &self,
        version_id: i32,
    ) -> Result<Option<config_version::Model>, DbErr> {
        config_service::get_version(&self.db, version_id).await
    }

    pub async fn get_metrics(
        &self,
        device_id: i32,
        query: MetricQuery,
    ) -> Result<Vec<metric_sample::Model>, DbErr> {
        metric_service::query_samples(&self.db, device_id, query).await
    }

    pub async fn get_events(&self, filter: EventFilter) -> Result<Vec<event_record::Model>, DbErr> {
        event_service::query_events(&self.db, filter).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // --- schedule commands ---

    pub async fn list_schedules(
        &self,
        device_id: Option<i32>,
    ) -> Result<Vec<schedule_entry::Model>, DbErr> {
        schedule_service::list_schedules(&self.db, device_id).await
    }

    pub async fn create_schedule(
        &self,
        spec: NewSchedule,
    ) -> Result<schedule_entry::Model, ScheduleError> {
        device_service::get_active_device(&self.db, spec.device_id)
            .await
            .map_err(|e| match e {
                RegistryError::Database(db) => ScheduleError::Database(db),
                _ => ScheduleError::Validation(format!("device {} not found", spec.device_id)),
            })?;
        schedule_service::create_schedule(&self.db, spec).await
    }

    pub async fn set_schedule_enabled(
        &self,
        schedule_id: i32,
        enabled: bool,
    ) -> Result<schedule_entry::Model, ScheduleError> {
        schedule_service::set_enabled(&self.db, schedule_id, enabled).await
    }

    pub async fn delete_schedule(&self, schedule_id: i32) -> Result<(), ScheduleError> {
        schedule_service::delete_schedule(&self.db, schedule_id).await
    }
}

/// The production runner: opens real SSH and SNMP sessions and writes
/// every outcome to the event log with its timing.
struct EngineRunner {
    db: DatabaseConnection,
    cfg: ServerConfig,
    crypto: SecretCipher,
    events: EventBroadcaster,
    /// Polls where every sub-query failed, per device. Advisory only, so
    /// living in memory (and resetting on restart) is fine.
    consecutive_poll_failures: DashMap<i32, u32>,
}

#[async_trait]
impl JobRunner for EngineRunner {
    async fn run(&self, device: device::Model, kind: JobKind, cancel: CancelFlag) {
        let started = std::time::Instant::now();
        let result = match kind {
            JobKind::Backup => self.run_backup_job(&device, cancel).await,
            JobKind::Poll => self.run_poll_job(&device, cancel).await,
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        let event = match result {
            Ok(event) => event,
            Err(e) => job_error_event(&e),
        };
        let record = NewEvent {
            device_id: Some(device.id),
            job_kind: Some(kind),
            kind: event.0,
            detail: event.1,
            duration_ms: Some(duration_ms),
        };
        if let Err(e) = self.events.record(&self.db, record).await {
            // Storage is gone; nothing else to do for this run but say so.
            error!(device_id = device.id, error = %e, "Failed to record job outcome.");
        }
    }
}

type OutcomeEvent = (EventKind, String);

impl EngineRunner {
    async fn run_backup_job(
        &self,
        device: &device::Model,
        cancel: CancelFlag,
    ) -> Result<OutcomeEvent, JobError> {
        let (username, password) = device_service::open_shell_credentials(&self.crypto, device)
            .map_err(|e| JobError::AuthFailure(format!("credential store: {e}")))?;
        let dialect = dialect::dialect_for(&device.vendor)
            .ok_or_else(|| JobError::Unreachable(format!("unknown dialect '{}'", device.vendor)))?;

        info!(device_id = device.id, host = %device.host, "Starting backup.");
        let outcome =
            backup::run_backup(&self.db, device, username, password, dialect, &self.cfg, cancel)
                .await?;

        Ok(match outcome {
            BackupOutcome::Success { version_id, bytes } => (
                EventKind::Success,
                format!("stored configuration version {version_id} ({bytes} bytes)"),
            ),
            BackupOutcome::SuccessNoChange { version_id } => (
                EventKind::SuccessNoChange,
                format!("configuration unchanged; still at version {version_id}"),
            ),
        })
    }

    async fn run_poll_job(
        &self,
        device: &device::Model,
        cancel: CancelFlag,
    ) -> Result<OutcomeEvent, JobError> {
        let community = device_service::open_snmp_community(&self.crypto, device)
            .map_err(|e| JobError::AuthFailure(format!("credential store: {e}")))?;
        let dialect = dialect::dialect_for(&device.vendor)
            .ok_or_else(|| JobError::Unreachable(format!("unknown dialect '{}'", device.vendor)))?;

        let report =
            monitor::run_poll(&self.db, device, community, dialect, &self.cfg, cancel).await?;

        if report.samples_stored > 0 {
            self.events.publish(EngineEvent::MetricBatch {
                device_id: device.id,
                count: report.samples_stored,
            });
        }
        self.events.publish(EngineEvent::DeviceStatus {
            device_id: device.id,
            status: if report.reachable { "online" } else { "offline" }.to_string(),
        });

        if report.all_failed() {
            let streak = {
                let mut count = self.consecutive_poll_failures.entry(device.id).or_insert(0);
                *count += 1;
                *count
            };
            if streak == self.cfg.unreachable_threshold {
                warn!(device_id = device.id, streak, "Device unreachable for consecutive polls.");
                return Ok((
                    EventKind::DeviceUnreachable,
                    format!("every sub-query failed for {streak} consecutive polls"),
                ));
            }
            return Ok((
                EventKind::Failure,
                format!("all {} sub-queries failed", report.sub_queries),
            ));
        }

        self.consecutive_poll_failures.remove(&device.id);

        if report.failures.is_empty() {
            Ok((
                EventKind::Success,
                format!("stored {} samples", report.samples_stored),
            ))
        } else {
            let failed: Vec<String> = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.name, f.detail))
                .collect();
            Ok((
                EventKind::PartialFailure,
                format!(
                    "stored {} samples; failed sub-queries: {}",
                    report.samples_stored,
                    failed.join("; ")
                ),
            ))
        }
    }
}

fn job_error_event(error: &JobError) -> OutcomeEvent {
    match error {
        JobError::AuthFailure(detail) => (EventKind::AuthFailure, detail.clone()),
        JobError::Unreachable(detail) => (EventKind::DeviceUnreachable, detail.clone()),
        JobError::Storage(e) => (EventKind::Failure, format!("storage error: {e}")),
        JobError::Cancelled => (EventKind::Failure, "cancelled by operator".to_string()),
    }
}
