//! Task transport between submitters and workers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;

use printopt_core::{Lane, TaskId};

use super::types::{Task, TaskStatus};

/// Durable multi-lane queue.
///
/// Delivery is at-least-once: a task that was dequeued but never acked may be
/// delivered again (crash recovery), so handlers must be idempotent.
pub trait Broker: Send + Sync {
    /// Persist a new task and make it available on its lane.
    fn enqueue(&self, task: Task) -> Result<TaskId, BrokerError>;

    /// Wait up to `timeout` for a ready task on `lane`.
    ///
    /// Returns `None` on timeout or once the broker is closed.
    fn dequeue(&self, lane: Lane, timeout: Duration) -> Result<Option<Task>, BrokerError>;

    /// Persist the `STARTED` transition of an in-flight task.
    ///
    /// Fails with [`BrokerError::Terminal`] when the stored task already
    /// finished; the delivery is then dropped from the in-flight set.
    fn mark_started(&self, task: &Task) -> Result<(), BrokerError>;

    /// Persist a terminal task and drop it from the in-flight set.
    ///
    /// A stored task that is already terminal is never overwritten.
    fn ack(&self, task: &Task) -> Result<(), BrokerError>;

    /// Persist the task and make it deliverable again after `delay`.
    ///
    /// Fails with [`BrokerError::Terminal`] instead of reviving a finished task.
    fn requeue(&self, task: &Task, delay: Duration) -> Result<(), BrokerError>;

    /// Current snapshot of a task.
    fn get(&self, task_id: TaskId) -> Result<Option<Task>, BrokerError>;

    /// Wake blocked consumers and stop handing out tasks.
    fn close(&self);
}

impl<B: Broker + ?Sized> Broker for Arc<B> {
    fn enqueue(&self, task: Task) -> Result<TaskId, BrokerError> {
        (**self).enqueue(task)
    }

    fn dequeue(&self, lane: Lane, timeout: Duration) -> Result<Option<Task>, BrokerError> {
        (**self).dequeue(lane, timeout)
    }

    fn mark_started(&self, task: &Task) -> Result<(), BrokerError> {
        (**self).mark_started(task)
    }

    fn ack(&self, task: &Task) -> Result<(), BrokerError> {
        (**self).ack(task)
    }

    fn requeue(&self, task: &Task, delay: Duration) -> Result<(), BrokerError> {
        (**self).requeue(task, delay)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, BrokerError> {
        (**self).get(task_id)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Broker error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// The transport cannot accept or serve requests right now.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    /// The stored task is `SUCCESS` or `FAILURE` and cannot change any more.
    #[error("task already finished: {0}")]
    Terminal(TaskId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-lane queue depths.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LaneDepth {
    /// Deliverable now
    pub ready: usize,
    /// Requeued and still waiting out their backoff
    pub delayed: usize,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    lanes: HashMap<Lane, VecDeque<TaskId>>,
    in_flight: HashSet<TaskId>,
    closed: bool,
}

impl State {
    /// Pop the first task on the lane that is ready at `now`.
    fn take_ready(&mut self, lane: Lane) -> Option<Task> {
        let now = Utc::now();
        let queue = self.lanes.get_mut(&lane)?;
        let pos = queue
            .iter()
            .position(|id| self.tasks.get(id).is_some_and(|t| t.is_ready(now)))?;
        let id = queue.remove(pos)?;
        self.in_flight.insert(id);
        self.tasks.get(&id).cloned()
    }

    /// Time until the next delayed task on the lane becomes ready.
    fn next_ready_in(&self, lane: Lane) -> Option<Duration> {
        let now = Utc::now();
        self.lanes
            .get(&lane)?
            .iter()
            .filter_map(|id| self.tasks.get(id)?.available_at)
            .min()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// In-memory broker for tests/dev and single-process deployments.
///
/// Tasks live in a map; each lane is a FIFO of ids. Delayed tasks stay in
/// their lane and are skipped until their `available_at` has passed.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    ready: Condvar,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Storage("broker lock poisoned".into()))
    }

    /// Take a specific queued task regardless of its delay.
    ///
    /// Used by the eager broker to run retries without waiting.
    pub fn claim(&self, task_id: TaskId) -> Result<Option<Task>, BrokerError> {
        let mut state = self.lock()?;
        let Some(task) = state.tasks.get(&task_id).cloned() else {
            return Ok(None);
        };
        let Some(queue) = state.lanes.get_mut(&task.lane) else {
            return Ok(None);
        };
        let Some(pos) = queue.iter().position(|id| *id == task_id) else {
            return Ok(None);
        };
        queue.remove(pos);
        state.in_flight.insert(task_id);
        Ok(Some(task))
    }

    pub fn depth(&self, lane: Lane) -> LaneDepth {
        let Ok(state) = self.lock() else {
            return LaneDepth::default();
        };
        let now = Utc::now();
        let (ready, delayed) = state
            .lanes
            .get(&lane)
            .into_iter()
            .flatten()
            .filter_map(|id| state.tasks.get(id))
            .fold((0, 0), |(ready, delayed), t| {
                if t.is_ready(now) {
                    (ready + 1, delayed)
                } else {
                    (ready, delayed + 1)
                }
            });
        LaneDepth {
            ready,
            delayed,
            in_flight: state
                .in_flight
                .iter()
                .filter(|id| state.tasks.get(*id).is_some_and(|t| t.lane == lane))
                .count(),
        }
    }

    /// Every known task, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut tasks: Vec<_> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Overwrite the stored snapshot unless it is already terminal.
    fn store(state: &mut State, task: &Task) -> Result<(), BrokerError> {
        match state.tasks.get_mut(&task.id) {
            Some(existing) if existing.status.is_terminal() => Err(BrokerError::Terminal(task.id)),
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(BrokerError::NotFound(task.id)),
        }
    }
}

impl Broker for InMemoryBroker {
    fn enqueue(&self, task: Task) -> Result<TaskId, BrokerError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(BrokerError::Unavailable("broker is closed".into()));
        }
        if state.tasks.contains_key(&task.id) {
            return Err(BrokerError::AlreadyExists(task.id));
        }
        let id = task.id;
        let lane = task.lane;
        state.tasks.insert(id, task);
        state.lanes.entry(lane).or_default().push_back(id);
        drop(state);

        self.ready.notify_all();
        Ok(id)
    }

    fn dequeue(&self, lane: Lane, timeout: Duration) -> Result<Option<Task>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;

        loop {
            if state.closed {
                return Ok(None);
            }
            if let Some(task) = state.take_ready(lane) {
                return Ok(Some(task));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let mut wait = deadline - now;
            if let Some(next) = state.next_ready_in(lane) {
                wait = wait.min(next.max(Duration::from_millis(1)));
            }

            state = self
                .ready
                .wait_timeout(state, wait)
                .map_err(|_| BrokerError::Storage("broker lock poisoned".into()))?
                .0;
        }
    }

    fn mark_started(&self, task: &Task) -> Result<(), BrokerError> {
        debug_assert_eq!(task.status, TaskStatus::Started);
        let mut state = self.lock()?;
        let stored = Self::store(&mut state, task);
        if matches!(stored, Err(BrokerError::Terminal(_))) {
            state.in_flight.remove(&task.id);
        }
        stored
    }

    fn ack(&self, task: &Task) -> Result<(), BrokerError> {
        let mut state = self.lock()?;
        match Self::store(&mut state, task) {
            Ok(()) | Err(BrokerError::Terminal(_)) => {
                state.in_flight.remove(&task.id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn requeue(&self, task: &Task, delay: Duration) -> Result<(), BrokerError> {
        let mut task = task.clone();
        task.available_at = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());

        let mut state = self.lock()?;
        let stored = Self::store(&mut state, &task);
        state.in_flight.remove(&task.id);
        stored?;
        state.lanes.entry(task.lane).or_default().push_back(task.id);
        drop(state);

        self.ready.notify_all();
        Ok(())
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, BrokerError> {
        Ok(self.lock()?.tasks.get(&task_id).cloned())
    }

    fn close(&self) {
        if let Ok(mut state) = self.lock() {
            state.closed = true;
        }
        self.ready.notify_all();
    }
}
