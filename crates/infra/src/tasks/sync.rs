//! Marketplace synchronisation tasks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use printopt_core::Lane;

use crate::jobs::{RegistryError, RetryPolicy, TaskDefinition, TaskOutput, TaskRegistry};

use super::{decode_payload, CollaboratorError, SYNC_MARKETPLACE_DATA, SYNC_USER_MARKETPLACE_DATA};

/// Marketplace statistics source.
pub trait MarketplaceSync: Send + Sync {
    /// Ids of users whose data should be synced.
    fn active_users(&self) -> Result<Vec<i64>, CollaboratorError>;

    /// Pull and store the latest marketplace stats of one user.
    fn sync_user(&self, user_id: i64) -> Result<Value, CollaboratorError>;
}

/// Input of `sync.user_marketplace_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSync {
    pub user_id: i64,
}

/// Per-user line of a full sync report.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct UserSyncResult {
    user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn register(
    registry: &mut TaskRegistry,
    marketplace: Arc<dyn MarketplaceSync>,
) -> Result<(), RegistryError> {
    let m = marketplace.clone();
    registry.register(
        TaskDefinition::new(SYNC_MARKETPLACE_DATA, Lane::Sync, RetryPolicy::sync()),
        move |_task| {
            let users = m.active_users()?;
            let results: Vec<_> = users
                .iter()
                .map(|&user_id| match m.sync_user(user_id) {
                    Ok(stats) => UserSyncResult {
                        user_id,
                        stats: Some(stats),
                        error: None,
                    },
                    Err(e) => {
                        error!(user_id, error = %e, "marketplace sync failed for user");
                        UserSyncResult {
                            user_id,
                            stats: None,
                            error: Some(e.to_string()),
                        }
                    }
                })
                .collect();

            info!(users = users.len(), "marketplace sync completed");
            Ok(TaskOutput::Report(json!({ "results": results })))
        },
    )?;

    let m = marketplace;
    registry.register(
        TaskDefinition::new(SYNC_USER_MARKETPLACE_DATA, Lane::Sync, RetryPolicy::sync()),
        move |task| {
            let UserSync { user_id } = decode_payload(task)?;
            let stats = m.sync_user(user_id)?;
            info!(user_id, "marketplace sync completed for user");
            Ok(TaskOutput::Report(json!({ "user_id": user_id, "stats": stats })))
        },
    )?;

    Ok(())
}
