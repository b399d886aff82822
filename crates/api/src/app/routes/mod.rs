//! Route modules (one file per area).

use axum::Router;

pub mod ai;
pub mod sync;
pub mod system;
pub mod tasks;

/// Versioned API routes.
pub fn router() -> Router {
    Router::new()
        .nest("/api/v1/ai", ai::router())
        .nest("/api/v1/sync", sync::router())
        .nest("/api/v1/tasks", tasks::router())
}
