use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::json;

use printopt_ai::{ComplexityRequest, PrintTimeRequest};
use printopt_infra::tasks;

use crate::app::dto::accepted;
use crate::app::errors::{json_error, parse_model_id, submit_error_to_response};
use crate::app::routes::tasks::get_task;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/seo/:model_id", post(generate_seo_title))
        .route("/description/:model_id", post(generate_description))
        .route("/tags/:model_id", post(generate_tags))
        .route("/complexity/:model_id", post(analyze_complexity))
        .route("/print-time/:model_id", post(predict_print_time))
        .route("/result/:task_id", get(get_task))
}

async fn submit_for_model(
    services: Arc<AppServices>,
    task_type: &'static str,
    model_id: String,
    input: serde_json::Value,
) -> axum::response::Response {
    let key = match parse_model_id(&model_id) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    match services.submit(task_type, Some(key), input).await {
        Ok(task_id) => accepted(task_id),
        Err(e) => submit_error_to_response(e),
    }
}

async fn generate_seo_title(
    Extension(services): Extension<Arc<AppServices>>,
    Path(model_id): Path<String>,
) -> axum::response::Response {
    submit_for_model(services, tasks::SEO_TITLE, model_id, json!({})).await
}

async fn generate_description(
    Extension(services): Extension<Arc<AppServices>>,
    Path(model_id): Path<String>,
) -> axum::response::Response {
    submit_for_model(services, tasks::MARKET_DESCRIPTION, model_id, json!({})).await
}

async fn generate_tags(
    Extension(services): Extension<Arc<AppServices>>,
    Path(model_id): Path<String>,
) -> axum::response::Response {
    submit_for_model(services, tasks::TAGS, model_id, json!({})).await
}

async fn analyze_complexity(
    Extension(services): Extension<Arc<AppServices>>,
    Path(model_id): Path<String>,
    Json(body): Json<ComplexityRequest>,
) -> axum::response::Response {
    if let Err(e) = body.validate() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_input", e.to_string());
    }
    let input = json!({ "model_file_url": body.model_file_url });
    submit_for_model(services, tasks::COMPLEXITY_ANALYSIS, model_id, input).await
}

async fn predict_print_time(
    Extension(services): Extension<Arc<AppServices>>,
    Path(model_id): Path<String>,
    Json(body): Json<PrintTimeRequest>,
) -> axum::response::Response {
    if let Err(e) = body.validate() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_input", e.to_string());
    }
    match serde_json::to_value(&body) {
        Ok(input) => submit_for_model(services, tasks::PRINT_TIME, model_id, input).await,
        Err(e) => json_error(StatusCode::BAD_REQUEST, "invalid_input", e.to_string()),
    }
}
