use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use printopt_core::TaskId;

/// Body of every `202 Accepted` submission response.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedResponse {
    pub task_id: TaskId,
    pub status: &'static str,
}

impl QueuedResponse {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: "queued",
        }
    }
}

pub fn accepted(task_id: TaskId) -> axum::response::Response {
    (StatusCode::ACCEPTED, axum::Json(QueuedResponse::new(task_id))).into_response()
}
