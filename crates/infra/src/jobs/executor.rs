//! Task execution: dispatch table, retry state machine and worker threads.

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use printopt_core::Lane;
use printopt_observability::{OtelTaskMetrics, TaskMetrics};

use crate::results::{ResultStore, ResultStoreError};

use super::broker::{Broker, BrokerError};
use super::types::{HandlerError, RetryPolicy, Task, TaskOutput};

/// Task handler function type.
pub type TaskHandler = Box<dyn Fn(&Task) -> Result<TaskOutput, HandlerError> + Send + Sync>;

/// Static description of a task type: where it runs and how it retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub task_type: String,
    pub lane: Lane,
    pub retry: RetryPolicy,
}

impl TaskDefinition {
    pub fn new(task_type: impl Into<String>, lane: Lane, retry: RetryPolicy) -> Self {
        Self {
            task_type: task_type.into(),
            lane,
            retry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("task type registered twice: {0}")]
    Duplicate(String),
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
}

/// Dispatch table from task type to definition and handler.
///
/// Built once at startup; everything that submits tasks validates the task
/// type against it, so a dequeued task always has a handler.
#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<String, (TaskDefinition, TaskHandler)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, definition: TaskDefinition, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&Task) -> Result<TaskOutput, HandlerError> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&definition.task_type) {
            return Err(RegistryError::Duplicate(definition.task_type));
        }
        self.entries
            .insert(definition.task_type.clone(), (definition, Box::new(handler)));
        Ok(())
    }

    pub fn definition(&self, task_type: &str) -> Option<&TaskDefinition> {
        self.entries.get(task_type).map(|(def, _)| def)
    }

    /// Like [`definition`](Self::definition) but fails for unknown types.
    pub fn require(&self, task_type: &str) -> Result<&TaskDefinition, RegistryError> {
        self.definition(task_type)
            .ok_or_else(|| RegistryError::UnknownTaskType(task_type.to_string()))
    }

    fn handler(&self, task_type: &str) -> Option<&TaskHandler> {
        self.entries.get(task_type).map(|(_, handler)| handler)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Lanes that at least one registered task type runs on.
    pub fn lanes(&self) -> BTreeSet<Lane> {
        self.entries.values().map(|(def, _)| def.lane).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

/// Why an attempt (or the whole task) failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("retries exhausted after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("no handler registered for task type {0}")]
    UnknownTaskType(String),
    #[error("task {0} produced metadata but has no entity key")]
    MissingEntityKey(String),
    #[error("failed to persist result: {0}")]
    Store(#[from] ResultStoreError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Result of one [`TaskRunner::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    /// Attempt failed; the task was requeued with this delay.
    Retrying(Duration),
    /// Attempt failed and no attempts are left.
    Failed,
    /// The delivered task had already finished; nothing ran.
    Skipped,
}

/// Runs single attempts of tasks and drives their state machine.
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn ResultStore>,
    metrics: Arc<dyn TaskMetrics>,
}

impl TaskRunner {
    pub fn new(registry: Arc<TaskRegistry>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            registry,
            store,
            metrics: Arc::new(OtelTaskMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn TaskMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Execute one attempt of a dequeued task.
    ///
    /// Broker write failures are logged, not returned: the task stays in
    /// flight and is redelivered, which is safe because result merges are
    /// idempotent.
    ///
    /// A redelivered task that already reached `SUCCESS` or `FAILURE` is acked
    /// and skipped, so terminal states never move backwards.
    pub fn run<B: Broker + ?Sized>(&self, broker: &B, mut task: Task) -> RunOutcome {
        if task.status.is_terminal() {
            debug!(task_id = %task.id, status = %task.status, "skipping finished task");
            if let Err(e) = broker.ack(&task) {
                error!(task_id = %task.id, error = %e, "failed to ack task");
            }
            return RunOutcome::Skipped;
        }

        let started = task.mark_started();
        match broker.mark_started(&task) {
            Ok(()) => {}
            Err(BrokerError::Terminal(_)) => {
                debug!(task_id = %task.id, "task finished elsewhere, skipping");
                return RunOutcome::Skipped;
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "failed to persist STARTED"),
        }
        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            lane = %task.lane,
            attempt = task.attempt_count,
            "task started"
        );

        let clock = Instant::now();
        let result = self.execute(&task);
        let elapsed = clock.elapsed();
        self.metrics
            .record_execution(&task.task_type, elapsed, result.is_ok());

        match result {
            Ok(output) => {
                task.mark_succeeded(started, output);
                if let Err(e) = broker.ack(&task) {
                    error!(task_id = %task.id, error = %e, "failed to ack task");
                }
                info!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt_count,
                    duration_ms = elapsed.as_millis() as u64,
                    "task succeeded"
                );
                RunOutcome::Succeeded
            }
            Err(err) if task.attempt_count < task.max_attempts => {
                let delay = self.retry_policy(&task).delay_for_attempt(task.attempt_count);
                self.metrics.record_failure(&task.task_type, false);
                warn!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt_count,
                    max_attempts = task.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "task failed, retrying"
                );
                task.mark_retrying(err.to_string(), started, delay);
                match broker.requeue(&task, delay) {
                    Ok(()) => {}
                    Err(BrokerError::Terminal(_)) => {
                        debug!(task_id = %task.id, "task finished elsewhere, not requeued");
                    }
                    Err(e) => error!(task_id = %task.id, error = %e, "failed to requeue task"),
                }
                RunOutcome::Retrying(delay)
            }
            Err(err) => {
                let terminal = TaskError::RetriesExhausted {
                    attempts: task.attempt_count,
                    last_error: err.to_string(),
                };
                self.metrics.record_failure(&task.task_type, true);
                error!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    attempt = task.attempt_count,
                    error = %terminal,
                    "task failed"
                );
                task.mark_failed(terminal.to_string(), started);
                if let Err(e) = broker.ack(&task) {
                    error!(task_id = %task.id, error = %e, "failed to ack task");
                }
                RunOutcome::Failed
            }
        }
    }

    fn retry_policy(&self, task: &Task) -> RetryPolicy {
        self.registry
            .definition(&task.task_type)
            .map(|def| def.retry.clone())
            .unwrap_or_default()
    }

    /// Invoke the handler and persist what it produced.
    fn execute(&self, task: &Task) -> Result<Option<serde_json::Value>, TaskError> {
        let handler = self
            .registry
            .handler(&task.task_type)
            .ok_or_else(|| TaskError::UnknownTaskType(task.task_type.clone()))?;

        let output = panic::catch_unwind(AssertUnwindSafe(|| handler(task)))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())))??;

        match output {
            TaskOutput::Metadata(patch) => {
                let key = task
                    .entity_key
                    .as_ref()
                    .ok_or_else(|| TaskError::MissingEntityKey(task.id.to_string()))?;
                self.store.merge(key, &patch)?;
                Ok(None)
            }
            TaskOutput::Report(report) => Ok(Some(report)),
            TaskOutput::Empty => Ok(None),
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long one dequeue waits before re-checking for shutdown
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub skipped: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running worker.
///
/// Dropping the handle stops the worker after its current task without
/// waiting for it.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    lane: Lane,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Request graceful shutdown and wait for the current task to finish.
    pub fn shutdown(mut self) {
        self.request_shutdown();
        self.join();
    }

    fn request_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    fn join(&mut self) {
        if let Some(j) = self.join.take() {
            if j.join().is_err() {
                error!(worker = %self.name, "worker thread panicked");
            }
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// A consumer bound to one lane.
pub struct Worker;

impl Worker {
    /// Spawn a worker in a named background thread.
    pub fn spawn(
        name: impl Into<String>,
        lane: Lane,
        broker: Arc<dyn Broker>,
        runner: Arc<TaskRunner>,
        config: WorkerConfig,
    ) -> std::io::Result<WorkerHandle> {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let thread_name = name.clone();
        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            worker_loop(&thread_name, lane, &*broker, &runner, &config, &shutdown_rx, &stats_clone);
        })?;

        Ok(WorkerHandle {
            name,
            lane,
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop(
    name: &str,
    lane: Lane,
    broker: &dyn Broker,
    runner: &TaskRunner,
    config: &WorkerConfig,
    shutdown_rx: &mpsc::Receiver<()>,
    stats: &Mutex<WorkerStats>,
) {
    info!(worker = %name, lane = %lane, "worker started");
    let start_time = Instant::now();

    loop {
        if shutdown_signalled(shutdown_rx, Duration::ZERO) {
            break;
        }

        let polled_at = Instant::now();
        match broker.dequeue(lane, config.poll_interval) {
            Ok(Some(task)) => {
                debug!(worker = %name, task_id = %task.id, task_type = %task.task_type, "claimed task");
                let outcome = runner.run(broker, task);

                if let Ok(mut s) = stats.lock() {
                    s.processed += 1;
                    s.uptime_secs = start_time.elapsed().as_secs();
                    match outcome {
                        RunOutcome::Succeeded => s.succeeded += 1,
                        RunOutcome::Retrying(_) => s.retried += 1,
                        RunOutcome::Failed => s.failed += 1,
                        RunOutcome::Skipped => s.skipped += 1,
                    }
                }
            }
            Ok(None) => {
                // A closed broker returns immediately; wait out the interval.
                let remaining = config.poll_interval.saturating_sub(polled_at.elapsed());
                if shutdown_signalled(shutdown_rx, remaining) {
                    break;
                }
                if let Ok(mut s) = stats.lock() {
                    s.uptime_secs = start_time.elapsed().as_secs();
                }
            }
            Err(e) => {
                error!(worker = %name, lane = %lane, error = %e, "failed to dequeue task");
                if shutdown_signalled(shutdown_rx, config.poll_interval) {
                    break;
                }
            }
        }
    }

    info!(worker = %name, lane = %lane, "worker stopped");
}

/// Wait up to `wait` for a shutdown signal. A dropped handle counts as one.
pub(crate) fn shutdown_signalled(shutdown_rx: &mpsc::Receiver<()>, wait: Duration) -> bool {
    !matches!(shutdown_rx.recv_timeout(wait), Err(mpsc::RecvTimeoutError::Timeout))
}

/// A fixed set of workers over one or more lanes.
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Start `workers_per_lane` workers on each lane.
    pub fn start(
        broker: Arc<dyn Broker>,
        runner: Arc<TaskRunner>,
        lanes: &[Lane],
        workers_per_lane: usize,
        config: WorkerConfig,
    ) -> std::io::Result<Self> {
        let mut pool = Self::default();
        for &lane in lanes {
            for i in 0..workers_per_lane.max(1) {
                let handle = Worker::spawn(
                    format!("worker-{lane}-{i}"),
                    lane,
                    broker.clone(),
                    runner.clone(),
                    config.clone(),
                );
                match handle {
                    Ok(handle) => pool.workers.push(handle),
                    Err(e) => {
                        pool.shutdown();
                        return Err(e);
                    }
                }
            }
        }
        info!(workers = pool.workers.len(), lanes = ?lanes, "worker pool started");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn stats(&self) -> Vec<(String, WorkerStats)> {
        self.workers
            .iter()
            .map(|w| (w.name().to_string(), w.stats()))
            .collect()
    }

    /// Signal every worker first, then wait for all of them.
    pub fn shutdown(self) {
        for worker in &self.workers {
            worker.request_shutdown();
        }
        for mut worker in self.workers {
            worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use printopt_core::EntityKey;
    use printopt_observability::InMemoryTaskMetrics;

    use crate::jobs::broker::InMemoryBroker;
    use crate::jobs::types::TaskStatus;
    use crate::results::{InMemoryResultStore, MetadataPatch, ModelMetadata};

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        store: Arc<InMemoryResultStore>,
        metrics: Arc<InMemoryTaskMetrics>,
        runner: TaskRunner,
    }

    fn fixture(registry: TaskRegistry) -> Fixture {
        let store = InMemoryResultStore::arc();
        let metrics = Arc::new(InMemoryTaskMetrics::new());
        let runner = TaskRunner::new(Arc::new(registry), store.clone()).with_metrics(metrics.clone());
        Fixture {
            broker: InMemoryBroker::arc(),
            store,
            metrics,
            runner,
        }
    }

    fn def(task_type: &str, attempts: u32) -> TaskDefinition {
        TaskDefinition::new(task_type, Lane::Ai, RetryPolicy::fixed(attempts, Duration::from_secs(30)))
    }

    fn keyed(task_type: &str, max_attempts: u32) -> Task {
        Task::new(
            task_type,
            Lane::Ai,
            Some(EntityKey::new("m1").unwrap()),
            serde_json::json!({}),
            max_attempts,
        )
    }

    fn claim(broker: &InMemoryBroker) -> Task {
        broker.dequeue(Lane::Ai, Duration::ZERO).unwrap().unwrap()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register(def("ai.tags", 3), |_| Ok(TaskOutput::Empty)).unwrap();
        let err = registry
            .register(def("ai.tags", 3), |_| Ok(TaskOutput::Empty))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("ai.tags".into()));
        assert!(registry.require("ai.nope").is_err());
    }

    #[test]
    fn successful_run_merges_metadata_and_acks() {
        let mut registry = TaskRegistry::new();
        registry
            .register(def("ai.seo_title", 3), |_| {
                Ok(TaskOutput::Metadata(MetadataPatch::seo_title("Rocket Vase")))
            })
            .unwrap();
        let f = fixture(registry);

        let id = f.broker.enqueue(keyed("ai.seo_title", 3)).unwrap();
        let outcome = f.runner.run(&*f.broker, claim(&f.broker));

        assert_eq!(outcome, RunOutcome::Succeeded);
        let task = f.broker.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.attempt_count, 1);
        let record = f.store.get(&EntityKey::new("m1").unwrap()).unwrap().unwrap();
        assert_eq!(record.seo_title.as_deref(), Some("Rocket Vase"));
        assert_eq!(f.metrics.snapshot("ai.seo_title").successes, 1);
    }

    #[test]
    fn failed_attempt_is_requeued_with_policy_delay() {
        let mut registry = TaskRegistry::new();
        registry
            .register(def("ai.tags", 3), |_| Err(HandlerError::new("model timeout")))
            .unwrap();
        let f = fixture(registry);

        let id = f.broker.enqueue(keyed("ai.tags", 3)).unwrap();
        let outcome = f.runner.run(&*f.broker, claim(&f.broker));

        assert_eq!(outcome, RunOutcome::Retrying(Duration::from_secs(30)));
        let task = f.broker.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Started);
        assert!(task.error.is_none());
        assert!(task.available_at.is_some());
        assert_eq!(f.metrics.snapshot("ai.tags").failures, 1);
    }

    #[test]
    fn exhausted_task_fails_and_keeps_existing_record() {
        let mut registry = TaskRegistry::new();
        registry
            .register(def("ai.tags", 2), |_| Err(HandlerError::new("model timeout")))
            .unwrap();
        let f = fixture(registry);
        let key = EntityKey::new("m1").unwrap();
        let before: ModelMetadata = f.store.merge(&key, &MetadataPatch::seo_title("Kept")).unwrap();

        let id = f.broker.enqueue(keyed("ai.tags", 2)).unwrap();
        assert!(matches!(f.runner.run(&*f.broker, claim(&f.broker)), RunOutcome::Retrying(_)));
        let again = f.broker.claim(id).unwrap().unwrap();
        assert_eq!(f.runner.run(&*f.broker, again), RunOutcome::Failed);

        let task = f.broker.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failure);
        assert_eq!(task.attempt_count, 2);
        assert!(task.error.as_deref().unwrap().contains("model timeout"));
        assert_eq!(f.store.get(&key).unwrap().unwrap(), before);
        assert_eq!(f.metrics.snapshot("ai.tags").terminal_failures, 1);
    }

    #[test]
    fn finished_task_is_not_run_again() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = TaskRegistry::new();
        {
            let calls = calls.clone();
            registry
                .register(def("ai.seo_title", 3), move |_| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(TaskOutput::Metadata(MetadataPatch::seo_title("Rocket Vase")))
                    } else {
                        Err(HandlerError::new("should not run twice"))
                    }
                })
                .unwrap();
        }
        let f = fixture(registry);

        let id = f.broker.enqueue(keyed("ai.seo_title", 3)).unwrap();
        let stale = claim(&f.broker);
        assert_eq!(f.runner.run(&*f.broker, stale.clone()), RunOutcome::Succeeded);

        // Redelivery of the finished snapshot
        let snapshot = f.broker.get(id).unwrap().unwrap();
        assert_eq!(f.runner.run(&*f.broker, snapshot), RunOutcome::Skipped);

        // Redelivery of a copy taken before the first run finished
        assert_eq!(f.runner.run(&*f.broker, stale), RunOutcome::Skipped);

        let task = f.broker.get(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_counts_as_failed_attempt() {
        let mut registry = TaskRegistry::new();
        registry
            .register(def("ai.tags", 1), |_| panic!("generator exploded"))
            .unwrap();
        let f = fixture(registry);

        let id = f.broker.enqueue(keyed("ai.tags", 1)).unwrap();
        assert_eq!(f.runner.run(&*f.broker, claim(&f.broker)), RunOutcome::Failed);

        let task = f.broker.get(id).unwrap().unwrap();
        assert!(task.error.as_deref().unwrap().contains("generator exploded"));
    }

    #[test]
    fn store_failure_counts_as_failed_attempt() {
        struct BrokenStore;
        impl ResultStore for BrokenStore {
            fn merge(&self, _: &EntityKey, _: &MetadataPatch) -> Result<ModelMetadata, ResultStoreError> {
                Err(ResultStoreError::Unavailable("connection refused".into()))
            }
            fn get(&self, _: &EntityKey) -> Result<Option<ModelMetadata>, ResultStoreError> {
                Ok(None)
            }
        }

        let mut registry = TaskRegistry::new();
        registry
            .register(def("ai.seo_title", 2), |_| {
                Ok(TaskOutput::Metadata(MetadataPatch::seo_title("x")))
            })
            .unwrap();
        let runner = TaskRunner::new(Arc::new(registry), Arc::new(BrokenStore));
        let broker = InMemoryBroker::new();

        broker.enqueue(keyed("ai.seo_title", 2)).unwrap();
        let outcome = runner.run(&broker, claim(&broker));
        assert!(matches!(outcome, RunOutcome::Retrying(_)));
    }

    #[test]
    fn metadata_output_without_entity_key_fails() {
        let mut registry = TaskRegistry::new();
        registry
            .register(def("ai.seo_title", 1), |_| {
                Ok(TaskOutput::Metadata(MetadataPatch::seo_title("x")))
            })
            .unwrap();
        let f = fixture(registry);

        let id = f
            .broker
            .enqueue(Task::new("ai.seo_title", Lane::Ai, None, serde_json::json!({}), 1))
            .unwrap();
        assert_eq!(f.runner.run(&*f.broker, claim(&f.broker)), RunOutcome::Failed);
        assert!(f.broker.get(id).unwrap().unwrap().error.unwrap().contains("no entity key"));
    }

    #[test]
    fn report_output_is_stored_on_task() {
        let mut registry = TaskRegistry::new();
        registry
            .register(def("maintenance.report", 1), |_| {
                Ok(TaskOutput::Report(serde_json::json!({"deleted_files": 3})))
            })
            .unwrap();
        let f = fixture(registry);

        let id = f
            .broker
            .enqueue(Task::new("maintenance.report", Lane::Ai, None, serde_json::json!({}), 1))
            .unwrap();
        f.runner.run(&*f.broker, claim(&f.broker));

        let task = f.broker.get(id).unwrap().unwrap();
        assert_eq!(task.output, Some(serde_json::json!({"deleted_files": 3})));
        assert!(f.store.is_empty());
    }

    #[test]
    fn worker_pool_drains_lane_and_shuts_down() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = TaskRegistry::new();
        {
            let calls = calls.clone();
            registry
                .register(def("ai.seo_title", 1), move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(TaskOutput::Metadata(MetadataPatch::seo_title("t")))
                })
                .unwrap();
        }
        let f = fixture(registry);
        let broker: Arc<dyn Broker> = f.broker.clone();

        let ids: Vec<_> = (0..5)
            .map(|_| broker.enqueue(keyed("ai.seo_title", 1)).unwrap())
            .collect();

        let pool = WorkerPool::start(
            broker.clone(),
            Arc::new(f.runner),
            &[Lane::Ai],
            2,
            WorkerConfig::default().with_poll_interval(Duration::from_millis(20)),
        )
        .unwrap();
        assert_eq!(pool.len(), 2);

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline
            && !ids
                .iter()
                .all(|id| broker.get(*id).unwrap().unwrap().status == TaskStatus::Success)
        {
            thread::sleep(Duration::from_millis(10));
        }

        let processed: u64 = pool.stats().iter().map(|(_, s)| s.processed).sum();
        pool.shutdown();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(processed, 5);
    }

    #[test]
    fn dropped_sender_counts_as_shutdown() {
        let (tx, rx) = mpsc::channel::<()>();
        assert!(!shutdown_signalled(&rx, Duration::from_millis(10)));

        drop(tx);
        let started = Instant::now();
        assert!(shutdown_signalled(&rx, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn dropped_worker_handle_stops_consuming() {
        let mut registry = TaskRegistry::new();
        registry
            .register(def("ai.seo_title", 1), |_| {
                Ok(TaskOutput::Metadata(MetadataPatch::seo_title("t")))
            })
            .unwrap();
        let f = fixture(registry);
        let broker: Arc<dyn Broker> = f.broker.clone();

        let handle = Worker::spawn(
            "worker-ai-dropped",
            Lane::Ai,
            broker.clone(),
            Arc::new(f.runner),
            WorkerConfig::default().with_poll_interval(Duration::from_millis(20)),
        )
        .unwrap();
        drop(handle);
        thread::sleep(Duration::from_millis(100));

        let id = broker.enqueue(keyed("ai.seo_title", 1)).unwrap();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(broker.get(id).unwrap().unwrap().status, TaskStatus::Pending);
        assert_eq!(f.broker.depth(Lane::Ai).ready, 1);
    }
}
