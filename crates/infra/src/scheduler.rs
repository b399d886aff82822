//! Periodic task emission (beat).
//!
//! Entries fire on a fixed interval or a cron expression. Each firing goes
//! through the [`SubmissionGateway`] like a manual submission. Windows missed
//! while the process was down or busy are skipped, never backfilled.

use std::str::FromStr;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use printopt_core::{Lane, TaskId};

use crate::gateway::SubmissionGateway;
use crate::jobs::executor::shutdown_signalled;
use crate::jobs::{Broker, TaskRegistry};

/// When an entry fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    Every(Duration),
    Cron(cron::Schedule),
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Schedule::Every(interval)
    }

    /// Parse a six-field cron expression (`sec min hour day month weekday`).
    pub fn cron(expression: &str) -> Result<Self, ScheduleError> {
        cron::Schedule::from_str(expression)
            .map(Schedule::Cron)
            .map_err(|e| ScheduleError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }

    /// First occurrence strictly after `after`, given the previous due time.
    fn next_after(&self, previous: DateTime<Utc>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                let step_ms = step.num_milliseconds();
                if step_ms <= 0 {
                    return None;
                }
                if previous > after {
                    return Some(previous);
                }
                let skipped = (after - previous).num_milliseconds() / step_ms + 1;
                previous.checked_add_signed(chrono::Duration::milliseconds(skipped.checked_mul(step_ms)?))
            }
            Schedule::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

/// One periodic task.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub task_type: String,
    pub lane: Lane,
    pub schedule: Schedule,
    pub payload: serde_json::Value,
}

impl ScheduleEntry {
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        lane: Lane,
        schedule: Schedule,
    ) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            lane,
            schedule,
            payload: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },
    #[error("schedule entry {entry}: unknown task type {task_type}")]
    UnknownTaskType { entry: String, task_type: String },
    #[error("schedule entry {entry}: task type runs on lane {expected}, not {configured}")]
    LaneMismatch {
        entry: String,
        expected: Lane,
        configured: Lane,
    },
    #[error("schedule entry {0} never fires")]
    NeverFires(String),
}

#[derive(Debug)]
struct Slot {
    entry: ScheduleEntry,
    due: DateTime<Utc>,
}

/// Emits scheduled tasks onto their lanes.
#[derive(Debug)]
pub struct Scheduler {
    gateway: SubmissionGateway,
    slots: Vec<Slot>,
}

impl Scheduler {
    /// Validate entries against the registry and compute first due times,
    /// strictly after `now`.
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<TaskRegistry>,
        entries: Vec<ScheduleEntry>,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            let definition = registry.definition(&entry.task_type).ok_or_else(|| {
                ScheduleError::UnknownTaskType {
                    entry: entry.name.clone(),
                    task_type: entry.task_type.clone(),
                }
            })?;
            if definition.lane != entry.lane {
                return Err(ScheduleError::LaneMismatch {
                    entry: entry.name.clone(),
                    expected: definition.lane,
                    configured: entry.lane,
                });
            }
            let due = entry
                .schedule
                .next_after(now, now)
                .ok_or_else(|| ScheduleError::NeverFires(entry.name.clone()))?;
            debug!(entry = %entry.name, due = %due, "scheduled");
            slots.push(Slot { entry, due });
        }

        Ok(Self {
            gateway: SubmissionGateway::new(broker, registry),
            slots,
        })
    }

    /// Next due time of the named entry.
    pub fn next_due(&self, name: &str) -> Option<DateTime<Utc>> {
        self.slots
            .iter()
            .find(|s| s.entry.name == name)
            .map(|s| s.due)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.slots.iter().map(|s| &s.entry)
    }

    /// Enqueue every entry that is due at `now`. Returns the new task ids.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        let mut submitted = Vec::new();

        for slot in self.slots.iter_mut().filter(|s| s.due <= now) {
            let entry = &slot.entry;
            match self.gateway.submit_unkeyed(&entry.task_type, &entry.payload) {
                Ok(task_id) => {
                    info!(entry = %entry.name, task_id = %task_id, task_type = %entry.task_type, "scheduled task emitted");
                    submitted.push(task_id);
                }
                Err(e) => {
                    error!(entry = %entry.name, task_type = %entry.task_type, error = %e, "failed to emit scheduled task, skipping window");
                }
            }

            match entry.schedule.next_after(slot.due, now) {
                Some(next) => slot.due = next,
                None => {
                    warn!(entry = %entry.name, "schedule has no further occurrences");
                    slot.due = DateTime::<Utc>::MAX_UTC;
                }
            }
        }

        submitted
    }

    /// Run ticks every `interval` on a background thread.
    pub fn spawn(mut self, interval: Duration) -> std::io::Result<SchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new().name("beat".to_string()).spawn(move || {
            info!(entries = self.slots.len(), "scheduler started");
            loop {
                self.tick(Utc::now());
                if shutdown_signalled(&shutdown_rx, interval) {
                    break;
                }
            }
            info!("scheduler stopped");
        })?;

        Ok(SchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Handle to a running scheduler thread.
///
/// Dropping the handle stops the thread at its next tick boundary.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::jobs::{InMemoryBroker, RetryPolicy, TaskDefinition, TaskOutput, TaskStatus};

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                TaskDefinition::new("sync.marketplace_data", Lane::Sync, RetryPolicy::sync()),
                |_| Ok(TaskOutput::Empty),
            )
            .unwrap();
        registry
            .register(
                TaskDefinition::new("maintenance.daily_analytics", Lane::Maintenance, RetryPolicy::maintenance()),
                |_| Ok(TaskOutput::Empty),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap()
    }

    fn sync_every_five_minutes() -> ScheduleEntry {
        ScheduleEntry::new(
            "sync-marketplace-data",
            "sync.marketplace_data",
            Lane::Sync,
            Schedule::every(Duration::from_secs(300)),
        )
    }

    #[test]
    fn interval_entry_fires_once_per_window() {
        let broker = InMemoryBroker::arc();
        let mut scheduler =
            Scheduler::new(broker.clone(), registry(), vec![sync_every_five_minutes()], t0()).unwrap();

        assert!(scheduler.tick(t0()).is_empty());
        assert!(scheduler.tick(t0() + chrono::Duration::seconds(299)).is_empty());

        let ids = scheduler.tick(t0() + chrono::Duration::seconds(300));
        assert_eq!(ids.len(), 1);
        let task = broker.get(ids[0]).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.lane, Lane::Sync);
        assert_eq!(task.max_attempts, 4);

        assert!(scheduler.tick(t0() + chrono::Duration::seconds(301)).is_empty());
    }

    #[test]
    fn missed_windows_are_not_backfilled() {
        let broker = InMemoryBroker::arc();
        let mut scheduler =
            Scheduler::new(broker.clone(), registry(), vec![sync_every_five_minutes()], t0()).unwrap();

        let late = t0() + chrono::Duration::hours(3) + chrono::Duration::seconds(10);
        assert_eq!(scheduler.tick(late).len(), 1);
        assert_eq!(
            scheduler.next_due("sync-marketplace-data"),
            Some(t0() + chrono::Duration::hours(3) + chrono::Duration::seconds(300))
        );
        assert_eq!(broker.tasks().len(), 1);
    }

    #[test]
    fn cron_entry_fires_at_midnight() {
        let entry = ScheduleEntry::new(
            "generate-analytics-reports",
            "maintenance.daily_analytics",
            Lane::Maintenance,
            Schedule::cron("0 0 0 * * *").unwrap(),
        );
        let mut scheduler = Scheduler::new(InMemoryBroker::arc(), registry(), vec![entry], t0()).unwrap();

        let midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(scheduler.next_due("generate-analytics-reports"), Some(midnight));
        assert_eq!(scheduler.tick(midnight).len(), 1);
        assert_eq!(
            scheduler.next_due("generate-analytics-reports"),
            Some(midnight + chrono::Duration::days(1))
        );
    }

    #[test]
    fn unknown_task_type_fails_construction() {
        let entry = ScheduleEntry::new("x", "nope", Lane::Sync, Schedule::every(Duration::from_secs(1)));
        let err = Scheduler::new(InMemoryBroker::arc(), registry(), vec![entry], t0()).unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownTaskType { .. }));
    }

    #[test]
    fn lane_must_match_task_definition() {
        let entry = ScheduleEntry::new(
            "x",
            "sync.marketplace_data",
            Lane::Maintenance,
            Schedule::every(Duration::from_secs(1)),
        );
        let err = Scheduler::new(InMemoryBroker::arc(), registry(), vec![entry], t0()).unwrap_err();
        assert!(matches!(err, ScheduleError::LaneMismatch { expected: Lane::Sync, .. }));
    }

    #[test]
    fn invalid_cron_and_zero_interval_are_rejected() {
        assert!(matches!(Schedule::cron("not a cron"), Err(ScheduleError::InvalidCron { .. })));

        let entry = ScheduleEntry::new("x", "sync.marketplace_data", Lane::Sync, Schedule::every(Duration::ZERO));
        let err = Scheduler::new(InMemoryBroker::arc(), registry(), vec![entry], t0()).unwrap_err();
        assert_eq!(err, ScheduleError::NeverFires("x".into()));
    }

    #[test]
    fn enqueue_failure_skips_the_window() {
        let broker = InMemoryBroker::arc();
        let mut scheduler =
            Scheduler::new(broker.clone(), registry(), vec![sync_every_five_minutes()], t0()).unwrap();
        broker.close();

        let due = t0() + chrono::Duration::seconds(300);
        assert!(scheduler.tick(due).is_empty());
        assert_eq!(
            scheduler.next_due("sync-marketplace-data"),
            Some(due + chrono::Duration::seconds(300))
        );
    }

    #[test]
    fn spawned_scheduler_stops_on_shutdown() {
        let broker = InMemoryBroker::arc();
        let scheduler =
            Scheduler::new(broker, registry(), vec![sync_every_five_minutes()], Utc::now()).unwrap();
        let handle = scheduler.spawn(Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(30));
        handle.shutdown();
    }

    #[test]
    fn dropped_handle_stops_the_scheduler() {
        let broker = InMemoryBroker::arc();
        let scheduler = Scheduler::new(
            broker.clone(),
            registry(),
            vec![ScheduleEntry::new(
                "sync-fast",
                "sync.marketplace_data",
                Lane::Sync,
                Schedule::every(Duration::from_millis(5)),
            )],
            Utc::now(),
        )
        .unwrap();
        let handle = scheduler.spawn(Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(50));
        drop(handle);
        thread::sleep(Duration::from_millis(50));

        let settled = broker.depth(Lane::Sync).ready;
        assert!(settled > 0);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(broker.depth(Lane::Sync).ready, settled);
    }
}
