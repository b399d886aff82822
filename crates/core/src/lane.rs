//! Named queue partitions.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A named partition of the task queue.
///
/// Each lane is consumed independently, so a backlog of slow AI calls never
/// delays e-mail delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Ai,
    Sync,
    Maintenance,
    Emails,
}

impl Lane {
    pub const ALL: [Lane; 4] = [Lane::Ai, Lane::Sync, Lane::Maintenance, Lane::Emails];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Ai => "ai",
            Lane::Sync => "sync",
            Lane::Maintenance => "maintenance",
            Lane::Emails => "emails",
        }
    }
}

impl core::fmt::Display for Lane {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai" => Ok(Lane::Ai),
            "sync" => Ok(Lane::Sync),
            "maintenance" => Ok(Lane::Maintenance),
            "emails" | "email" => Ok(Lane::Emails),
            other => Err(DomainError::validation(format!(
                "unknown lane '{other}' (expected one of: ai, sync, maintenance, emails)"
            ))),
        }
    }
}
