//! Synchronous broker that executes tasks at enqueue time.

use std::sync::Arc;
use std::time::Duration;

use printopt_core::{Lane, TaskId};

use super::broker::{Broker, BrokerError, InMemoryBroker};
use super::executor::{RunOutcome, TaskRunner};
use super::types::Task;

/// Runs every task to a terminal state inside `enqueue`.
///
/// Retries run immediately (backoff delays are skipped), so by the time
/// `enqueue` returns the task is `SUCCESS` or `FAILURE`. Task records are
/// kept in an [`InMemoryBroker`], so `get` behaves like any other broker.
#[derive(Debug)]
pub struct EagerBroker {
    inner: InMemoryBroker,
    runner: Arc<TaskRunner>,
}

impl EagerBroker {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            inner: InMemoryBroker::new(),
            runner,
        }
    }
}

impl Broker for EagerBroker {
    fn enqueue(&self, task: Task) -> Result<TaskId, BrokerError> {
        let id = self.inner.enqueue(task)?;
        while let Some(task) = self.inner.claim(id)? {
            match self.runner.run(&self.inner, task) {
                RunOutcome::Retrying(_) => continue,
                RunOutcome::Succeeded | RunOutcome::Failed | RunOutcome::Skipped => break,
            }
        }
        Ok(id)
    }

    /// Nothing is ever left queued.
    fn dequeue(&self, _lane: Lane, _timeout: Duration) -> Result<Option<Task>, BrokerError> {
        Ok(None)
    }

    fn mark_started(&self, task: &Task) -> Result<(), BrokerError> {
        self.inner.mark_started(task)
    }

    fn ack(&self, task: &Task) -> Result<(), BrokerError> {
        self.inner.ack(task)
    }

    fn requeue(&self, task: &Task, delay: Duration) -> Result<(), BrokerError> {
        self.inner.requeue(task, delay)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, BrokerError> {
        self.inner.get(task_id)
    }

    fn close(&self) {
        self.inner.close()
    }
}
