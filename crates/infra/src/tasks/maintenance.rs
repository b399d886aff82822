//! Scheduled maintenance: temp-file cleanup, database backups, daily analytics.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use printopt_core::Lane;

use crate::jobs::{HandlerError, RegistryError, RetryPolicy, TaskDefinition, TaskOutput, TaskRegistry};

use super::{decode_payload, CollaboratorError, TaskDeps, BACKUP_DATABASE, CLEANUP_OLD_FILES, DAILY_ANALYTICS};

/// Per-user statistics for the daily report.
pub trait AnalyticsSource: Send + Sync {
    fn active_users(&self) -> Result<Vec<i64>, CollaboratorError>;

    /// Dashboard, project and material stats of one user.
    fn user_report(&self, user_id: i64) -> Result<Value, CollaboratorError>;
}

pub trait DatabaseBackup: Send + Sync {
    /// Write a backup into `dir` and return the file path.
    fn create_backup(&self, dir: &Path) -> Result<PathBuf, CollaboratorError>;
}

/// Backups through the `pg_dump` binary.
#[derive(Debug, Clone)]
pub struct PgDumpBackup {
    database_url: String,
}

impl PgDumpBackup {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

impl DatabaseBackup for PgDumpBackup {
    fn create_backup(&self, dir: &Path) -> Result<PathBuf, CollaboratorError> {
        fs::create_dir_all(dir)
            .map_err(|e| CollaboratorError::new(format!("cannot create {}: {e}", dir.display())))?;
        let file = dir.join(format!(
            "printopt_backup_{}.sql",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));

        let output = Command::new("pg_dump")
            .arg("--dbname")
            .arg(&self.database_url)
            .arg("--file")
            .arg(&file)
            .output()
            .map_err(|e| CollaboratorError::new(format!("failed to run pg_dump: {e}")))?;

        if !output.status.success() {
            return Err(CollaboratorError::new(format!(
                "pg_dump exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(file)
    }
}

fn default_days_old() -> u32 {
    30
}

/// Input of `maintenance.cleanup_old_files`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOptions {
    #[serde(default = "default_days_old")]
    pub days_old: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub deleted_files: u64,
    pub deleted_bytes: u64,
    pub removed_dirs: u64,
}

/// Delete files under `temp_dir` last modified more than `days_old` days ago,
/// then remove directories left empty. `temp_dir` itself is kept.
pub fn cleanup_old_files(temp_dir: &Path, days_old: u32) -> io::Result<CleanupReport> {
    let mut report = CleanupReport::default();
    if !temp_dir.is_dir() {
        return Ok(report);
    }
    let age = Duration::from_secs(u64::from(days_old) * 24 * 60 * 60);
    let cutoff = SystemTime::now().checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH);
    sweep(temp_dir, cutoff, &mut report)?;
    Ok(report)
}

fn sweep(dir: &Path, cutoff: SystemTime, report: &mut CleanupReport) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;

        if meta.is_dir() {
            sweep(&path, cutoff, report)?;
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
                report.removed_dirs += 1;
            }
        } else if meta.is_file() && meta.modified()? < cutoff {
            fs::remove_file(&path)?;
            report.deleted_files += 1;
            report.deleted_bytes += meta.len();
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub users_processed: usize,
    pub reports_written: usize,
    pub report_file: PathBuf,
}

/// Write `daily_analytics_<date>.json` with one entry per active user.
/// Users whose stats cannot be computed are logged and left out.
pub fn generate_daily_analytics(
    source: &dyn AnalyticsSource,
    reports_dir: &Path,
    date: NaiveDate,
) -> Result<AnalyticsSummary, HandlerError> {
    let users = source.active_users()?;
    let date_str = date.format("%Y-%m-%d").to_string();

    let reports: Vec<Value> = users
        .iter()
        .filter_map(|&user_id| match source.user_report(user_id) {
            Ok(stats) => Some(json!({ "user_id": user_id, "date": date_str, "stats": stats })),
            Err(e) => {
                error!(user_id, error = %e, "analytics generation failed for user");
                None
            }
        })
        .collect();

    fs::create_dir_all(reports_dir)
        .map_err(|e| HandlerError::new(format!("cannot create {}: {e}", reports_dir.display())))?;
    let report_file = reports_dir.join(format!("daily_analytics_{date_str}.json"));
    let body = serde_json::to_vec_pretty(&reports)
        .map_err(|e| HandlerError::new(format!("cannot encode analytics: {e}")))?;
    fs::write(&report_file, body)
        .map_err(|e| HandlerError::new(format!("cannot write {}: {e}", report_file.display())))?;

    Ok(AnalyticsSummary {
        users_processed: users.len(),
        reports_written: reports.len(),
        report_file,
    })
}

fn to_report<T: Serialize>(value: &T) -> Result<TaskOutput, HandlerError> {
    serde_json::to_value(value)
        .map(TaskOutput::Report)
        .map_err(|e| HandlerError::new(format!("cannot encode report: {e}")))
}

pub fn register(registry: &mut TaskRegistry, deps: &TaskDeps) -> Result<(), RegistryError> {
    let def = |task_type: &str| TaskDefinition::new(task_type, Lane::Maintenance, RetryPolicy::maintenance());

    let temp_dir = deps.dirs.uploads.join("temp");
    registry.register(def(CLEANUP_OLD_FILES), move |task| {
        let CleanupOptions { days_old } = decode_payload(task)?;
        let report = cleanup_old_files(&temp_dir, days_old)
            .map_err(|e| HandlerError::new(format!("file cleanup failed: {e}")))?;
        info!(
            deleted_files = report.deleted_files,
            deleted_mb = report.deleted_bytes as f64 / (1024.0 * 1024.0),
            "cleaned up old files"
        );
        to_report(&report)
    })?;

    let backup: Arc<dyn DatabaseBackup> = deps.backup.clone();
    let backup_dir = deps.dirs.backups.clone();
    registry.register(def(BACKUP_DATABASE), move |_task| {
        let file = backup.create_backup(&backup_dir)?;
        info!(backup_file = %file.display(), "database backup created");
        Ok(TaskOutput::Report(json!({ "backup_file": file })))
    })?;

    let analytics: Arc<dyn AnalyticsSource> = deps.analytics.clone();
    let reports_dir = deps.dirs.reports.clone();
    registry.register(def(DAILY_ANALYTICS), move |_task| {
        let summary = generate_daily_analytics(&*analytics, &reports_dir, Utc::now().date_naive())?;
        info!(users = summary.users_processed, "daily analytics generated");
        to_report(&summary)
    })?;

    Ok(())
}
