//! Task submission.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use printopt_core::{EntityKey, TaskId};

use crate::jobs::{Broker, BrokerError, Task, TaskRegistry};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),
    #[error("task input could not be encoded: {0}")]
    InvalidInput(String),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
}

impl From<BrokerError> for SubmitError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unavailable(msg) => SubmitError::BrokerUnavailable(msg),
            other => SubmitError::BrokerUnavailable(other.to_string()),
        }
    }
}

/// Accepts logical requests and turns them into queued tasks.
///
/// Submission never waits for execution: it returns as soon as the broker
/// has accepted the task.
#[derive(Clone)]
pub struct SubmissionGateway {
    broker: Arc<dyn Broker>,
    registry: Arc<TaskRegistry>,
}

impl SubmissionGateway {
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<TaskRegistry>) -> Self {
        Self { broker, registry }
    }

    /// Submit a task whose result is merged into `entity_key`'s record.
    pub fn submit<I: Serialize>(
        &self,
        task_type: &str,
        entity_key: EntityKey,
        input: &I,
    ) -> Result<TaskId, SubmitError> {
        self.submit_task(task_type, Some(entity_key), input)
    }

    /// Submit a task that is not tied to an entity.
    pub fn submit_unkeyed<I: Serialize>(
        &self,
        task_type: &str,
        input: &I,
    ) -> Result<TaskId, SubmitError> {
        self.submit_task(task_type, None, input)
    }

    fn submit_task<I: Serialize>(
        &self,
        task_type: &str,
        entity_key: Option<EntityKey>,
        input: &I,
    ) -> Result<TaskId, SubmitError> {
        let definition = self
            .registry
            .definition(task_type)
            .ok_or_else(|| SubmitError::UnknownTaskType(task_type.to_string()))?;
        let payload =
            serde_json::to_value(input).map_err(|e| SubmitError::InvalidInput(e.to_string()))?;

        let task = Task::new(
            task_type,
            definition.lane,
            entity_key,
            payload,
            definition.retry.max_attempts,
        );
        let lane = task.lane;

        let task_id = self.broker.enqueue(task).map_err(|e| {
            error!(task_type, lane = %lane, error = %e, "failed to enqueue task");
            SubmitError::from(e)
        })?;

        info!(task_id = %task_id, task_type, lane = %lane, "task submitted");
        Ok(task_id)
    }
}

impl std::fmt::Debug for SubmissionGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionGateway")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
