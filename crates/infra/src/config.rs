//! Engine configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use printopt_core::Lane;

use crate::jobs::WorkerConfig;
use crate::tasks::MaintenanceDirs;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value for {key}: {value:?} ({reason})")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Worker, scheduler and maintenance settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Lanes this process consumes
    pub worker_lanes: Vec<Lane>,
    pub workers_per_lane: usize,
    pub poll_interval: Duration,
    pub scheduler_tick: Duration,
    /// How long a claimed Redis delivery may stay in flight before it is redelivered
    pub claim_lease: Duration,
    pub dirs: MaintenanceDirs,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_lanes: Lane::ALL.to_vec(),
            workers_per_lane: 2,
            poll_interval: Duration::from_millis(500),
            scheduler_tick: Duration::from_millis(1000),
            claim_lease: Duration::from_secs(30 * 60),
            dirs: MaintenanceDirs::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Parse from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("PRINTOPT_WORKER_LANES") {
            config.worker_lanes = parse_lanes(&raw)?;
        }
        if let Some(raw) = lookup("PRINTOPT_WORKERS_PER_LANE") {
            let n: usize = parse("PRINTOPT_WORKERS_PER_LANE", &raw)?;
            if n == 0 {
                return Err(ConfigError::new("PRINTOPT_WORKERS_PER_LANE", raw, "must be at least 1"));
            }
            config.workers_per_lane = n;
        }
        if let Some(raw) = lookup("PRINTOPT_POLL_INTERVAL_MS") {
            config.poll_interval = parse_millis("PRINTOPT_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("PRINTOPT_SCHEDULER_TICK_MS") {
            config.scheduler_tick = parse_millis("PRINTOPT_SCHEDULER_TICK_MS", &raw)?;
        }
        if let Some(raw) = lookup("PRINTOPT_CLAIM_LEASE_SECS") {
            let secs: u64 = parse("PRINTOPT_CLAIM_LEASE_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::new("PRINTOPT_CLAIM_LEASE_SECS", raw, "must be positive"));
            }
            config.claim_lease = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("PRINTOPT_UPLOADS_DIR") {
            config.dirs.uploads = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("PRINTOPT_REPORTS_DIR") {
            config.dirs.reports = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("PRINTOPT_BACKUP_DIR") {
            config.dirs.backups = PathBuf::from(raw);
        }

        Ok(config)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default().with_poll_interval(self.poll_interval)
    }
}

/// Parse a typed value, naming the key on failure.
pub fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::new(key, raw, e.to_string()))
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = parse(key, raw)?;
    if ms == 0 {
        return Err(ConfigError::new(key, raw, "must be positive"));
    }
    Ok(Duration::from_millis(ms))
}

fn parse_lanes(raw: &str) -> Result<Vec<Lane>, ConfigError> {
    let mut lanes = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let lane: Lane = parse("PRINTOPT_WORKER_LANES", part)?;
        if !lanes.contains(&lane) {
            lanes.push(lane);
        }
    }
    if lanes.is_empty() {
        return Err(ConfigError::new("PRINTOPT_WORKER_LANES", raw, "no lanes listed"));
    }
    Ok(lanes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.worker_lanes.len(), 4);
        assert_eq!(config.dirs.uploads, PathBuf::from("uploads"));
    }

    #[test]
    fn reads_all_keys() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("PRINTOPT_WORKER_LANES", "ai, emails,ai"),
            ("PRINTOPT_WORKERS_PER_LANE", "4"),
            ("PRINTOPT_POLL_INTERVAL_MS", "250"),
            ("PRINTOPT_SCHEDULER_TICK_MS", "2000"),
            ("PRINTOPT_CLAIM_LEASE_SECS", "600"),
            ("PRINTOPT_BACKUP_DIR", "/var/backups/printopt"),
        ]))
        .unwrap();

        assert_eq!(config.worker_lanes, vec![Lane::Ai, Lane::Emails]);
        assert_eq!(config.workers_per_lane, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.scheduler_tick, Duration::from_secs(2));
        assert_eq!(config.claim_lease, Duration::from_secs(600));
        assert_eq!(config.dirs.backups, PathBuf::from("/var/backups/printopt"));
    }

    #[test]
    fn rejects_bad_values() {
        let err = EngineConfig::from_lookup(lookup(&[("PRINTOPT_WORKER_LANES", "ai,gpu")])).unwrap_err();
        assert_eq!(err.key, "PRINTOPT_WORKER_LANES");

        let err = EngineConfig::from_lookup(lookup(&[("PRINTOPT_WORKERS_PER_LANE", "0")])).unwrap_err();
        assert_eq!(err.key, "PRINTOPT_WORKERS_PER_LANE");

        assert!(EngineConfig::from_lookup(lookup(&[("PRINTOPT_POLL_INTERVAL_MS", "soon")])).is_err());

        let err = EngineConfig::from_lookup(lookup(&[("PRINTOPT_CLAIM_LEASE_SECS", "0")])).unwrap_err();
        assert_eq!(err.key, "PRINTOPT_CLAIM_LEASE_SECS");
    }
}
