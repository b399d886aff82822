use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use printopt_core::{EntityKey, TaskId};
use printopt_infra::{QueryError, SubmitError};

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::BrokerUnavailable(msg) => {
            tracing::error!(error = %msg, "task submission failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "broker_unavailable", msg)
        }
        SubmitError::UnknownTaskType(task_type) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "unknown_task_type",
            format!("task type {task_type} is not registered"),
        ),
        SubmitError::InvalidInput(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
    }
}

pub fn query_error_to_response(err: QueryError) -> axum::response::Response {
    match err {
        QueryError::UnknownTask(task_id) => json_error(
            StatusCode::NOT_FOUND,
            "task_not_found",
            format!("task {task_id} not found"),
        ),
        QueryError::ResultNotFound { task_id, entity_key } => {
            tracing::error!(%task_id, %entity_key, "succeeded task has no stored result");
            json_error(
                StatusCode::NOT_FOUND,
                "result_not_found",
                format!("no result stored for {entity_key}"),
            )
        }
        QueryError::BrokerUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "broker_unavailable", msg)
        }
        QueryError::Store(e) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "result_store_unavailable",
            e.to_string(),
        ),
        QueryError::Encoding(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "encoding_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_model_id(raw: &str) -> Result<EntityKey, axum::response::Response> {
    EntityKey::new(raw)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_model_id", e.to_string()))
}

pub fn parse_task_id(raw: &str) -> Result<TaskId, axum::response::Response> {
    raw.parse()
        .map_err(|e: printopt_core::DomainError| {
            json_error(StatusCode::BAD_REQUEST, "invalid_task_id", e.to_string())
        })
}
