use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use printopt_ai::{AiError, ComplexityReport, MetadataGenerator, PrintTimeEstimate, PrintTimeRequest};
use printopt_api::app::{build_app, AppServices};
use printopt_api::dev::{DisabledBackup, LogMailer, OfflineMarketplace};
use printopt_core::EntityKey;
use printopt_infra::jobs::{WorkerConfig, WorkerPool};
use printopt_infra::tasks::{self, MaintenanceDirs, TaskDeps};

struct StubGenerator;

impl MetadataGenerator for StubGenerator {
    fn generate_seo_title(&self, model_id: &EntityKey) -> Result<String, AiError> {
        Ok(format!("Printable {model_id}"))
    }

    fn generate_market_description(&self, _model_id: &EntityKey) -> Result<String, AiError> {
        Ok("A sturdy print".to_string())
    }

    fn generate_tags(&self, _model_id: &EntityKey) -> Result<Vec<String>, AiError> {
        Ok(vec!["vase".into(), "decor".into()])
    }

    fn analyze_complexity(&self, _model_file_url: &str) -> Result<ComplexityReport, AiError> {
        Ok(ComplexityReport {
            vertices: 100,
            polygons: 200,
            file_size_kb: 12.5,
            complexity_score: 0.2,
        })
    }

    fn predict_print_time(&self, _request: &PrintTimeRequest) -> Result<PrintTimeEstimate, AiError> {
        Ok(PrintTimeEstimate {
            estimated_time_minutes: 42.0,
        })
    }
}

fn registry() -> Arc<printopt_infra::jobs::TaskRegistry> {
    let deps = TaskDeps {
        generator: Arc::new(StubGenerator),
        marketplace: Arc::new(OfflineMarketplace),
        mailer: Arc::new(LogMailer),
        analytics: Arc::new(OfflineMarketplace),
        backup: Arc::new(DisabledBackup),
        dirs: MaintenanceDirs::default(),
    };
    Arc::new(tasks::default_registry(&deps).unwrap())
}

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: Arc<AppServices>) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn eager() -> Self {
        Self::spawn(Arc::new(AppServices::eager(registry()))).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    /// Submit and return the task id from the `202` body.
    async fn submit(&self, path: &str, body: Option<Value>) -> String {
        let (status, body) = self.post(path, body).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        assert_eq!(body["status"], "queued");
        body["task_id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::eager().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn seo_and_tags_merge_into_one_record() {
    let server = TestServer::eager().await;

    let seo = server.submit("/api/v1/ai/seo/m1", None).await;
    let tags = server.submit("/api/v1/ai/tags/m1", None).await;
    assert_ne!(seo, tags);

    let (status, view) = server.get(&format!("/api/v1/ai/result/{tags}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "SUCCESS");
    assert_eq!(view["task_id"], tags.as_str());
    assert_eq!(view["data"]["model_id"], "m1");
    assert_eq!(view["data"]["seo_title"], "Printable m1");
    assert_eq!(view["data"]["tags"], json!(["vase", "decor"]));
    assert!(view.get("error").is_none());

    // Both endpoints expose the same view.
    let (_, same) = server.get(&format!("/api/v1/tasks/{seo}")).await;
    assert_eq!(same["status"], "SUCCESS");
    assert_eq!(same["data"]["tags"], json!(["vase", "decor"]));
}

#[tokio::test]
async fn complexity_and_print_time_land_in_the_record() {
    let server = TestServer::eager().await;

    server
        .submit(
            "/api/v1/ai/complexity/m2",
            Some(json!({ "model_file_url": "s3://models/m2.stl" })),
        )
        .await;
    let id = server
        .submit(
            "/api/v1/ai/print-time/m2",
            Some(json!({
                "model_file_url": "s3://models/m2.stl",
                "material": "PLA",
                "layer_height_mm": 0.2,
                "infill_percent": 20.0
            })),
        )
        .await;

    let (_, view) = server.get(&format!("/api/v1/tasks/{id}")).await;
    assert_eq!(view["status"], "SUCCESS");
    assert_eq!(view["data"]["vertices"], 100);
    assert_eq!(view["data"]["estimated_time_minutes"], 42.0);
}

#[tokio::test]
async fn invalid_print_time_input_is_rejected() {
    let server = TestServer::eager().await;
    let (status, body) = server
        .post(
            "/api/v1/ai/print-time/m3",
            Some(json!({
                "model_file_url": "s3://models/m3.stl",
                "material": "PLA",
                "layer_height_mm": 0.2,
                "infill_percent": 150.0
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn oversized_model_id_is_rejected() {
    let server = TestServer::eager().await;
    let long = "x".repeat(65);
    let (status, body) = server.post(&format!("/api/v1/ai/seo/{long}"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_model_id");
}

#[tokio::test]
async fn unknown_and_malformed_task_ids() {
    let server = TestServer::eager().await;

    let unknown = printopt_core::TaskId::new();
    let (status, body) = server.get(&format!("/api/v1/tasks/{unknown}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "task_not_found");

    let (status, body) = server.get("/api/v1/ai/result/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_task_id");
}

#[tokio::test]
async fn failing_sync_reports_failure_with_error() {
    let server = TestServer::eager().await;

    let id = server.submit("/api/v1/sync/users/7", None).await;
    let (status, view) = server.get(&format!("/api/v1/tasks/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "FAILURE");
    assert!(view.get("data").is_none());
    assert!(
        view["error"].as_str().unwrap().contains("retries exhausted"),
        "{view}"
    );

    let (status, body) = server.post("/api/v1/sync/users/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_user_id");
}

#[tokio::test]
async fn queued_task_is_pending_until_a_worker_runs_it() {
    let services = Arc::new(AppServices::in_memory(registry()));
    let server = TestServer::spawn(services.clone()).await;

    let id = server.submit("/api/v1/ai/description/m4", None).await;
    let (_, view) = server.get(&format!("/api/v1/tasks/{id}")).await;
    assert_eq!(view["status"], "PENDING");
    assert!(view.get("data").is_none());

    let pool = WorkerPool::start(
        services.broker.clone(),
        services.runner.clone(),
        &[printopt_core::Lane::Ai],
        1,
        WorkerConfig::default().with_poll_interval(Duration::from_millis(10)),
    )
    .unwrap();

    let mut last = Value::Null;
    for _ in 0..200 {
        let (_, view) = server.get(&format!("/api/v1/tasks/{id}")).await;
        if view["status"] == "SUCCESS" {
            last = view;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::task::spawn_blocking(move || pool.shutdown()).await.unwrap();

    assert_eq!(last["status"], "SUCCESS", "task did not finish in time");
    assert_eq!(last["data"]["market_description"], "A sturdy print");
}
