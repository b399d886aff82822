//! Process configuration.

use std::net::SocketAddr;
use std::str::FromStr;

use printopt_infra::config::{parse, ConfigError};
use printopt_infra::EngineConfig;

/// Which parts of the engine this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// API, workers and beat in one process.
    #[default]
    All,
    Api,
    Worker,
    Beat,
}

impl Role {
    pub fn runs_api(self) -> bool {
        matches!(self, Role::All | Role::Api)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, Role::All | Role::Worker)
    }

    pub fn runs_beat(self) -> bool {
        matches!(self, Role::All | Role::Beat)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Role::All),
            "api" => Ok(Role::Api),
            "worker" => Ok(Role::Worker),
            "beat" => Ok(Role::Beat),
            other => Err(format!("unknown role {other:?} (expected all, api, worker or beat)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub role: Role,
    /// Postgres result store + Redis broker instead of the in-memory pair.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            role: Role::default(),
            use_persistent_stores: false,
            database_url: None,
            redis_url: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            engine: EngineConfig::from_lookup(&lookup)?,
            ..Self::default()
        };

        if let Some(raw) = lookup("BIND_ADDR") {
            config.bind_addr = parse("BIND_ADDR", &raw)?;
        }
        if let Some(raw) = lookup("PRINTOPT_ROLE") {
            config.role = parse("PRINTOPT_ROLE", &raw)?;
        }
        if let Some(raw) = lookup("USE_PERSISTENT_STORES") {
            config.use_persistent_stores = parse_flag(&raw)
                .ok_or_else(|| ConfigError::new("USE_PERSISTENT_STORES", &raw, "expected a boolean"))?;
        }
        config.database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        config.redis_url = lookup("REDIS_URL").filter(|v| !v.trim().is_empty());

        if config.use_persistent_stores {
            if config.database_url.is_none() {
                return Err(ConfigError::new(
                    "DATABASE_URL",
                    "",
                    "required when USE_PERSISTENT_STORES is set",
                ));
            }
            if config.redis_url.is_none() {
                return Err(ConfigError::new(
                    "REDIS_URL",
                    "",
                    "required when USE_PERSISTENT_STORES is set",
                ));
            }
        }

        Ok(config)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
