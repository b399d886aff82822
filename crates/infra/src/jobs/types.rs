//! Core task types and retry policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use printopt_core::{EntityKey, Lane, TaskId};

use crate::results::MetadataPatch;

/// Task execution status as exposed to pollers.
///
/// `Pending` is initial, `Started` is set when a worker begins an attempt
/// (and kept while a retry is scheduled), `Success` and `Failure` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started => "STARTED",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy of a task class.
///
/// `max_attempts` counts executions, including the first one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of executions (>= 1)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interactive()
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Interactive AI generation: few attempts, minute-scale delays.
    pub fn interactive() -> Self {
        Self::exponential(3, Duration::from_secs(30), Duration::from_secs(300))
    }

    /// Outgoing e-mail: 60s, 120s, 240s.
    pub fn email() -> Self {
        Self::exponential(4, Duration::from_secs(60), Duration::from_secs(900))
    }

    /// Marketplace sync: fixed five minutes.
    pub fn sync() -> Self {
        Self::fixed(4, Duration::from_secs(300))
    }

    /// Scheduled maintenance: fixed one hour.
    pub fn maintenance() -> Self {
        Self::fixed(3, Duration::from_secs(3600))
    }

    /// Calculate delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let pow = 1u32 << (attempt - 1).min(16);
                self.base_delay.saturating_mul(pow)
            }
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
        };

        delay.min(self.max_delay.max(self.base_delay))
    }

    /// Check if another attempt is allowed after `attempt` executions.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Handler name, e.g. `ai.seo_title`
    pub task_type: String,
    /// Queue partition
    pub lane: Lane,
    /// Entity whose result record this task writes to
    pub entity_key: Option<EntityKey>,
    /// JSON input for the handler
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// Executions started so far
    pub attempt_count: u32,
    pub max_attempts: u32,
    /// Terminal failure cause (FAILURE only)
    pub error: Option<String>,
    /// Handler report for tasks without an entity key
    pub output: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time a requeued task may be delivered again
    pub available_at: Option<DateTime<Utc>>,
    /// One record per execution
    pub history: Vec<TaskAttempt>,
}

/// Record of a task execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttempt {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        task_type: impl Into<String>,
        lane: Lane,
        entity_key: Option<EntityKey>,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            lane,
            entity_key,
            payload,
            status: TaskStatus::Pending,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            error: None,
            output: None,
            created_at: now,
            updated_at: now,
            available_at: None,
            history: Vec::new(),
        }
    }

    /// Check if the task may be delivered at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.available_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Begin an attempt. Returns the attempt start time.
    pub fn mark_started(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.status = TaskStatus::Started;
        self.attempt_count += 1;
        self.available_at = None;
        self.updated_at = now;
        now
    }

    /// Finish the current attempt successfully.
    pub fn mark_succeeded(&mut self, started_at: DateTime<Utc>, output: Option<serde_json::Value>) {
        self.record_attempt(started_at, None);
        self.status = TaskStatus::Success;
        self.error = None;
        self.output = output;
    }

    /// Finish the current attempt with an error and schedule another one.
    ///
    /// The status stays `Started`: a retry is not a terminal state.
    pub fn mark_retrying(&mut self, error: String, started_at: DateTime<Utc>, delay: Duration) {
        let now = self.record_attempt(started_at, Some(error));
        self.status = TaskStatus::Started;
        self.available_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
    }

    /// Finish the current attempt with a terminal error.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>) {
        self.record_attempt(started_at, Some(error.clone()));
        self.status = TaskStatus::Failure;
        self.error = Some(error);
        self.available_at = None;
    }

    /// Error of the most recent failed attempt, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.history.iter().rev().find_map(|a| a.error.as_deref())
    }

    fn record_attempt(&mut self, started_at: DateTime<Utc>, error: Option<String>) -> DateTime<Utc> {
        let now = Utc::now();
        self.updated_at = now;
        self.history.push(TaskAttempt {
            attempt: self.attempt_count,
            started_at,
            finished_at: now,
            success: error.is_none(),
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
        now
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// Fields to merge into the entity's result record.
    Metadata(MetadataPatch),
    /// A standalone report stored on the task itself.
    Report(serde_json::Value),
    /// Nothing to persist.
    Empty,
}

/// Error raised by a task handler.
///
/// The executor treats every handler error the same way: it drives the
/// retry/backoff state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Payload could not be decoded into the handler's input type.
    pub fn invalid_payload(task_type: &str, err: impl std::fmt::Display) -> Self {
        Self::new(format!("invalid payload for {task_type}: {err}"))
    }
}

impl From<printopt_ai::AiError> for HandlerError {
    fn from(err: printopt_ai::AiError) -> Self {
        Self::new(err.to_string())
    }
}
