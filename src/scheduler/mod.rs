pub mod trigger;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::entities::{device, schedule_entry};
use crate::db::services::event_service::{EventKind, NewEvent};
use crate::db::services::{device_service, schedule_service};
use crate::server::event_broadcaster::EventBroadcaster;
use crate::workers::{CancelFlag, JobKind};

/// Per-(device, job-kind) execution slots. Holding a slot is what makes
/// runs strictly serialized per device and kind; the cancel flag for the
/// in-flight run lives in the same table so a cancel command can find it.
#[derive(Clone, Default)]
pub struct SlotTable {
    inner: Arc<DashMap<(i32, JobKind), CancelFlag>>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot, or returns None when a prior run is still in
    /// flight.
    pub fn try_acquire(&self, device_id: i32, kind: JobKind) -> Option<(SlotGuard, CancelFlag)> {
        match self.inner.entry((device_id, kind)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let flag = CancelFlag::new();
                vacant.insert(flag.clone());
                Some((
                    SlotGuard { table: Arc::clone(&self.inner), key: (device_id, kind) },
                    flag,
                ))
            }
        }
    }

    pub fn is_held(&self, device_id: i32, kind: JobKind) -> bool {
        self.inner.contains_key(&(device_id, kind))
    }

    /// Flips the cancel flag of the in-flight run, if any.
    pub fn cancel(&self, device_id: i32, kind: JobKind) -> bool {
        match self.inner.get(&(device_id, kind)) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }
}

/// Releases the slot on drop, whatever path the worker exits through.
pub struct SlotGuard {
    table: Arc<DashMap<(i32, JobKind), CancelFlag>>,
    key: (i32, JobKind),
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.table.remove(&self.key);
    }
}

/// The scheduler hands due work to a runner and never touches the network
/// itself. The engine provides the real SSH/SNMP runner; tests provide
/// stubs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, device: device::Model, kind: JobKind, cancel: CancelFlag);
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("a {kind} job for device {device_id} is already running")]
    Busy { device_id: i32, kind: JobKind },
    #[error("device {0} not found")]
    DeviceNotFound(i32),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

pub struct Scheduler {
    db: DatabaseConnection,
    runner: Arc<dyn JobRunner>,
    slots: SlotTable,
    /// Bounds how many worker jobs run at once across all devices.
    worker_permits: Arc<Semaphore>,
    events: EventBroadcaster,
    tick: Duration,
}

impl Scheduler {
    pub fn new(
        db: DatabaseConnection,
        runner: Arc<dyn JobRunner>,
        slots: SlotTable,
        events: EventBroadcaster,
        worker_pool_size: usize,
        tick: Duration,
    ) -> Self {
        Scheduler {
            db,
            runner,
            slots,
            worker_permits: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            events,
            tick,
        }
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Starts the clock tick task. The tick only decides what is due and
    /// spawns workers; it never blocks on network I/O or on a full pool.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            info!(tick_secs = scheduler.tick.as_secs(), "Scheduler tick loop started.");
            let mut ticker = interval(scheduler.tick);
            loop {
                ticker.tick().await;
                scheduler.run_tick().await;
            }
        })
    }

    /// One evaluation pass over all enabled schedule entries.
    pub async fn run_tick(&self) {
        let entries = match schedule_service::due_candidates(&self.db).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Failed to load schedule entries for tick.");
                return;
            }
        };

        let now = Utc::now();
        for entry in entries {
            let due_at = match entry.next_due_at {
                Some(due) => due,
                None => match schedule_service::bootstrap_due_time(&self.db, &entry).await {
                    Ok(due) => {
                        debug!(schedule_id = entry.id, %due, "Bootstrapped due time.");
                        continue;
                    }
                    Err(e) => {
                        warn!(schedule_id = entry.id, error = %e, "Could not bootstrap due time.");
                        continue;
                    }
                },
            };
            if due_at > now {
                continue;
            }
            self.fire_entry(&entry).await;
        }
    }

    async fn fire_entry(&self, entry: &schedule_entry::Model) {
        let Some(kind) = JobKind::parse(&entry.job_kind) else {
            warn!(schedule_id = entry.id, job_kind = %entry.job_kind, "Unknown job kind on schedule entry.");
            return;
        };

        let device = match device_service::get_active_device(&self.db, entry.device_id).await {
            Ok(device) => device,
            Err(e) => {
                debug!(schedule_id = entry.id, error = %e, "Skipping entry for missing device.");
                return;
            }
        };

        match self.dispatch(device, kind, Some(entry.id)).await {
            Ok(()) => {}
            Err(DispatchError::Busy { .. }) => {
                // Missed tick is dropped, not queued: one period forward
                // from the old due time.
                if let Err(e) = schedule_service::mark_skipped(&self.db, entry.id).await {
                    error!(schedule_id = entry.id, error = %e, "Failed to advance skipped entry.");
                }
            }
            Err(e) => {
                error!(schedule_id = entry.id, error = %e, "Dispatch failed.");
            }
        }
    }

    /// Manual "run now": bypasses the due-time check but not the slot.
    pub async fn run_now(&self, device_id: i32, kind: JobKind) -> Result<(), DispatchError> {
        let device = device_service::get_active_device(&self.db, device_id)
            .await
            .map_err(|_| DispatchError::DeviceNotFound(device_id))?;
        self.dispatch(device, kind, None).await
    }

    /// Claims the slot and spawns the worker task. A held slot records a
    /// `skipped` event and reports Busy; schedule bookkeeping for that
    /// case stays with the caller.
    async fn dispatch(
        &self,
        device: device::Model,
        kind: JobKind,
        schedule_id: Option<i32>,
    ) -> Result<(), DispatchError> {
        let device_id = device.id;
        let Some((guard, cancel)) = self.slots.try_acquire(device_id, kind) else {
            self.events
                .record(
                    &self.db,
                    NewEvent {
                        device_id: Some(device_id),
                        job_kind: Some(kind),
                        kind: EventKind::Skipped,
                        detail: "previous run still in flight; trigger dropped".to_string(),
                        duration_ms: None,
                    },
                )
                .await?;
            return Err(DispatchError::Busy { device_id, kind });
        };

        let run_id = Uuid::new_v4();
        debug!(%run_id, device_id, %kind, ?schedule_id, "Dispatching job.");

        let db = self.db.clone();
        let runner = Arc::clone(&self.runner);
        let permits = Arc::clone(&self.worker_permits);
        tokio::spawn(async move {
            // Waiting for a pool permit happens here, on the worker task,
            // with the slot already held so duplicate triggers stay
            // excluded while queued.
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // pool closed on shutdown
            };

            runner.run(device, kind, cancel).await;
            debug!(%run_id, "Job finished.");

            let completed_at = Utc::now();
            if let Some(schedule_id) = schedule_id {
                if let Err(e) =
                    schedule_service::mark_completed(&db, schedule_id, completed_at).await
                {
                    error!(schedule_id, error = %e, "Failed to record run completion.");
                }
            }
            drop(guard);
        });

        Ok(())
    }
}
