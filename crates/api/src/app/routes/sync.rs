use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, routing::post, Extension, Router};

use printopt_infra::tasks::{self, sync::UserSync};

use crate::app::dto::accepted;
use crate::app::errors::{json_error, submit_error_to_response};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/users/:user_id", post(sync_user))
}

async fn sync_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match user_id.trim().parse::<i64>() {
        Ok(id) if id > 0 => id,
        _ => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "invalid_user_id",
                "user_id must be a positive integer",
            )
        }
    };
    match services
        .submit(tasks::SYNC_USER_MARKETPLACE_DATA, None, UserSync { user_id })
        .await
    {
        Ok(task_id) => accepted(task_id),
        Err(e) => submit_error_to_response(e),
    }
}
