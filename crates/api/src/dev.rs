//! Stand-in collaborators for deployments without external integrations.
//!
//! Mail goes to the log, marketplace and analytics report no users, and
//! backups need a `DATABASE_URL`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use printopt_ai::UnconfiguredGenerator;
use printopt_infra::tasks::{
    AnalyticsSource, CollaboratorError, DatabaseBackup, Email, Mailer, MarketplaceSync, PgDumpBackup,
    TaskDeps,
};

use crate::config::AppConfig;

/// Writes outgoing mail to the log instead of an SMTP server.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, email: &Email) -> Result<(), CollaboratorError> {
        info!(
            recipient = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "email (log only)"
        );
        Ok(())
    }

    fn send_quote(&self, quote_id: i64, user_id: i64) -> Result<(), CollaboratorError> {
        info!(quote_id, user_id, "quote email (log only)");
        Ok(())
    }
}

/// Marketplace and analytics source with no connected accounts.
#[derive(Debug, Clone, Default)]
pub struct OfflineMarketplace;

impl MarketplaceSync for OfflineMarketplace {
    fn active_users(&self) -> Result<Vec<i64>, CollaboratorError> {
        Ok(Vec::new())
    }

    fn sync_user(&self, user_id: i64) -> Result<Value, CollaboratorError> {
        Err(CollaboratorError::new(format!(
            "no marketplace integration configured (user {user_id})"
        )))
    }
}

impl AnalyticsSource for OfflineMarketplace {
    fn active_users(&self) -> Result<Vec<i64>, CollaboratorError> {
        Ok(Vec::new())
    }

    fn user_report(&self, user_id: i64) -> Result<Value, CollaboratorError> {
        Err(CollaboratorError::new(format!("no analytics source configured (user {user_id})")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DisabledBackup;

impl DatabaseBackup for DisabledBackup {
    fn create_backup(&self, _dir: &Path) -> Result<PathBuf, CollaboratorError> {
        Err(CollaboratorError::new("database backups need DATABASE_URL"))
    }
}

/// Collaborators for the binary, based on what `config` provides.
pub fn task_deps(config: &AppConfig) -> TaskDeps {
    let backup: Arc<dyn DatabaseBackup> = match &config.database_url {
        Some(url) => Arc::new(PgDumpBackup::new(url.clone())),
        None => Arc::new(DisabledBackup),
    };

    TaskDeps {
        generator: Arc::new(UnconfiguredGenerator),
        marketplace: Arc::new(OfflineMarketplace),
        mailer: Arc::new(LogMailer),
        analytics: Arc::new(OfflineMarketplace),
        backup,
        dirs: config.engine.dirs.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_follows_database_url() {
        let deps = task_deps(&AppConfig::default());
        assert!(deps.backup.create_backup(Path::new("unused")).is_err());
    }

    #[test]
    fn offline_marketplace_has_no_users() {
        assert!(MarketplaceSync::active_users(&OfflineMarketplace).unwrap().is_empty());
        assert!(OfflineMarketplace.sync_user(7).is_err());
    }

    #[test]
    fn log_mailer_accepts_mail() {
        let email = Email {
            to: "a@example.com".into(),
            subject: "hi".into(),
            body: "body".into(),
            attachments: vec![],
        };
        assert!(LogMailer.send(&email).is_ok());
    }
}
