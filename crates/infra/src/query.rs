//! Task status and result lookup for polling clients.

use std::sync::Arc;

use serde::Serialize;

use printopt_core::TaskId;

use crate::jobs::{Broker, BrokerError, TaskStatus};
use crate::results::{ResultStore, ResultStoreError};

/// What a poller sees for one task.
///
/// `data` is only present for `SUCCESS`, `error` only for `FAILURE`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),
    /// The task succeeded but its entity has no record.
    #[error("task {task_id} succeeded but no result exists for {entity_key}")]
    ResultNotFound { task_id: TaskId, entity_key: String },
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("result store error: {0}")]
    Store(#[from] ResultStoreError),
    #[error("result could not be encoded: {0}")]
    Encoding(String),
}

impl From<BrokerError> for QueryError {
    fn from(err: BrokerError) -> Self {
        QueryError::BrokerUnavailable(err.to_string())
    }
}

/// Read-only view over task status and persisted results.
#[derive(Clone)]
pub struct ResultQueryService {
    broker: Arc<dyn Broker>,
    store: Arc<dyn ResultStore>,
}

impl ResultQueryService {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn ResultStore>) -> Self {
        Self { broker, store }
    }

    pub fn query(&self, task_id: TaskId) -> Result<TaskView, QueryError> {
        let task = self
            .broker
            .get(task_id)?
            .ok_or(QueryError::UnknownTask(task_id))?;

        let mut view = TaskView {
            task_id,
            status: task.status,
            data: None,
            error: None,
        };

        match task.status {
            TaskStatus::Pending | TaskStatus::Started => {}
            TaskStatus::Failure => view.error = task.error,
            TaskStatus::Success => match &task.entity_key {
                Some(key) => {
                    let record = self.store.get(key)?.ok_or_else(|| {
                        QueryError::ResultNotFound {
                            task_id,
                            entity_key: key.to_string(),
                        }
                    })?;
                    view.data = Some(
                        serde_json::to_value(record)
                            .map_err(|e| QueryError::Encoding(e.to_string()))?,
                    );
                }
                None => view.data = task.output,
            },
        }

        Ok(view)
    }
}
