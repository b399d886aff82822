//! Background task system: task model, broker transport, execution.
//!
//! ## Design
//!
//! - Tasks are typed by name and routed to a lane
//! - Every task type has a retry policy (fixed, linear or exponential backoff)
//! - Delivery is at-least-once; handlers write idempotently
//! - Status is visible to pollers through the broker
//!
//! ## Components
//!
//! - `Task`: the queued unit of work and its state machine
//! - `Broker`: transport (in-memory, Redis, or eager for tests)
//! - `TaskRegistry` / `TaskRunner`: dispatch and retry handling
//! - `Worker` / `WorkerPool`: lane consumers on background threads

pub mod broker;
pub mod eager;
pub mod executor;
#[cfg(feature = "redis")]
pub mod redis;
pub mod types;

pub use broker::{Broker, BrokerError, InMemoryBroker, LaneDepth};
pub use eager::EagerBroker;
pub use executor::{
    RegistryError, RunOutcome, TaskDefinition, TaskError, TaskHandler, TaskRegistry, TaskRunner,
    Worker, WorkerConfig, WorkerHandle, WorkerPool, WorkerStats,
};
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;
pub use types::{
    BackoffStrategy, HandlerError, RetryPolicy, Task, TaskAttempt, TaskOutput, TaskStatus,
};
