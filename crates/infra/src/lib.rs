//! Task engine: broker transport, workers, result persistence, scheduling.
//!
//! - `jobs`: task model, brokers, executor and worker pool
//! - `results`: per-model result records and their stores
//! - `gateway` / `query`: submission and polling
//! - `scheduler`: periodic task emission
//! - `tasks`: the concrete task catalog
//! - `config`: environment-driven engine settings

pub mod config;
pub mod gateway;
pub mod jobs;
pub mod query;
pub mod results;
pub mod scheduler;
pub mod tasks;

pub use config::{ConfigError, EngineConfig};
pub use gateway::{SubmissionGateway, SubmitError};
pub use query::{QueryError, ResultQueryService, TaskView};
pub use scheduler::{Schedule, ScheduleEntry, ScheduleError, Scheduler, SchedulerHandle};
