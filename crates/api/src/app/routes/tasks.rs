use std::sync::Arc;

use axum::{extract::Path, routing::get, Extension, Json, Router};
use axum::response::IntoResponse;

use crate::app::errors::{parse_task_id, query_error_to_response};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/:task_id", get(get_task))
}

/// Status of any task; `SUCCESS` carries the full entity record.
pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Path(task_id): Path<String>,
) -> axum::response::Response {
    let task_id = match parse_task_id(&task_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.task_view(task_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => query_error_to_response(e),
    }
}
