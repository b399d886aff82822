//! Catalog of concrete task types.
//!
//! Each submodule registers its handlers and owns the collaborator trait its
//! handlers call out to. [`default_registry`] builds the full dispatch table
//! and [`default_schedule`] the periodic entries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use printopt_ai::MetadataGenerator;
use printopt_core::{EntityKey, Lane};

use crate::jobs::{HandlerError, RegistryError, Task, TaskRegistry};
use crate::scheduler::{Schedule, ScheduleEntry, ScheduleError};

pub mod ai;
pub mod email;
pub mod maintenance;
pub mod sync;

pub use email::{Email, Mailer};
pub use maintenance::{AnalyticsSource, DatabaseBackup, PgDumpBackup};
pub use sync::MarketplaceSync;

pub const SEO_TITLE: &str = "ai.seo_title";
pub const MARKET_DESCRIPTION: &str = "ai.market_description";
pub const TAGS: &str = "ai.tags";
pub const COMPLEXITY_ANALYSIS: &str = "ai.complexity_analysis";
pub const PRINT_TIME: &str = "ai.print_time";
pub const SYNC_MARKETPLACE_DATA: &str = "sync.marketplace_data";
pub const SYNC_USER_MARKETPLACE_DATA: &str = "sync.user_marketplace_data";
pub const SEND_EMAIL: &str = "emails.send_email";
pub const SEND_QUOTE_EMAIL: &str = "emails.send_quote_email";
pub const CLEANUP_OLD_FILES: &str = "maintenance.cleanup_old_files";
pub const BACKUP_DATABASE: &str = "maintenance.backup_database";
pub const DAILY_ANALYTICS: &str = "maintenance.daily_analytics";

/// Failure reported by an external collaborator (mailer, marketplace, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<CollaboratorError> for HandlerError {
    fn from(err: CollaboratorError) -> Self {
        HandlerError::new(err.0)
    }
}

/// Filesystem locations used by maintenance tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceDirs {
    pub uploads: PathBuf,
    pub reports: PathBuf,
    pub backups: PathBuf,
}

impl Default for MaintenanceDirs {
    fn default() -> Self {
        Self {
            uploads: PathBuf::from("uploads"),
            reports: PathBuf::from("reports"),
            backups: PathBuf::from("backups"),
        }
    }
}

/// Everything the handlers need from the outside world.
#[derive(Clone)]
pub struct TaskDeps {
    pub generator: Arc<dyn MetadataGenerator>,
    pub marketplace: Arc<dyn MarketplaceSync>,
    pub mailer: Arc<dyn Mailer>,
    pub analytics: Arc<dyn AnalyticsSource>,
    pub backup: Arc<dyn DatabaseBackup>,
    pub dirs: MaintenanceDirs,
}

/// Build the dispatch table with every task type of the catalog.
pub fn default_registry(deps: &TaskDeps) -> Result<TaskRegistry, RegistryError> {
    let mut registry = TaskRegistry::new();
    ai::register(&mut registry, deps.generator.clone())?;
    sync::register(&mut registry, deps.marketplace.clone())?;
    email::register(&mut registry, deps.mailer.clone())?;
    maintenance::register(&mut registry, deps)?;
    Ok(registry)
}

/// Periodic entries of a standard deployment.
pub fn default_schedule() -> Result<Vec<ScheduleEntry>, ScheduleError> {
    const DAY: u64 = 24 * 60 * 60;

    Ok(vec![
        ScheduleEntry::new(
            "sync-marketplace-data",
            SYNC_MARKETPLACE_DATA,
            Lane::Sync,
            Schedule::every(Duration::from_secs(300)),
        ),
        ScheduleEntry::new(
            "cleanup-old-files",
            CLEANUP_OLD_FILES,
            Lane::Maintenance,
            Schedule::every(Duration::from_secs(DAY)),
        ),
        ScheduleEntry::new(
            "generate-analytics-reports",
            DAILY_ANALYTICS,
            Lane::Maintenance,
            Schedule::cron("0 0 0 * * *")?,
        ),
        ScheduleEntry::new(
            "backup-database",
            BACKUP_DATABASE,
            Lane::Maintenance,
            Schedule::every(Duration::from_secs(7 * DAY)),
        ),
    ])
}

/// Decode the task payload into the handler's input type.
pub(crate) fn decode_payload<T: DeserializeOwned>(task: &Task) -> Result<T, HandlerError> {
    serde_json::from_value(task.payload.clone())
        .map_err(|e| HandlerError::invalid_payload(&task.task_type, e))
}

pub(crate) fn require_entity_key(task: &Task) -> Result<&EntityKey, HandlerError> {
    task.entity_key
        .as_ref()
        .ok_or_else(|| HandlerError::new(format!("{} requires an entity key", task.task_type)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_the_catalog() {
        let registry = default_registry(&testing::deps(MaintenanceDirs::default())).unwrap();
        assert_eq!(registry.len(), 12);
        assert_eq!(registry.require(SEO_TITLE).unwrap().lane, Lane::Ai);
        assert_eq!(registry.require(SEND_EMAIL).unwrap().lane, Lane::Emails);
        assert_eq!(registry.require(SYNC_MARKETPLACE_DATA).unwrap().lane, Lane::Sync);
        assert_eq!(registry.require(BACKUP_DATABASE).unwrap().lane, Lane::Maintenance);
        assert_eq!(registry.lanes().len(), 4);
    }

    #[test]
    fn default_schedule_only_uses_registered_types() {
        let registry = default_registry(&testing::deps(MaintenanceDirs::default())).unwrap();
        for entry in default_schedule().unwrap() {
            let def = registry.require(&entry.task_type).unwrap();
            assert_eq!(def.lane, entry.lane, "{}", entry.name);
        }
    }
}
