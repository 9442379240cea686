//! Common test utilities for E2E testing.
//!
//! This module provides a test fixture that creates an in-process server
//! over an in-memory broker, enabling end-to-end testing of crack requests
//! without external infrastructure.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use crackhash_core::{
    Config, ExecutorConfig, JobOrchestrator, MemoryBroker, Role, SqliteJobStore, TaskExecutor,
    Transport,
};

/// Re-export fixtures for test convenience
pub use crackhash_core::testing::fixtures;

/// Test fixture for E2E testing.
///
/// Provides an in-process server wired to:
/// - An in-memory broker the test can inspect
/// - A SQLite job store in a temporary directory
/// - Optionally an executor consuming tasks
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_crack_request() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/hash/crack", json!({
///         "hash": fixtures::md5_hex("ab"),
///         "maxLength": 2
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Broker shared by every component of the fixture
    pub broker: MemoryBroker,
    /// The orchestrator, when the role runs one
    pub orchestrator: Option<Arc<JobOrchestrator>>,
    /// The executor, when enabled
    pub executor: Option<TaskExecutor>,
    /// Temporary directory for the job database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a manager fixture without executors.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = Config {
            role: test_config.role,
            ..Config::default()
        };
        config.database.path = db_path.clone();
        config.orchestrator = fixtures::orchestrator_config(
            test_config.worker_count,
            Duration::from_secs(300),
        );

        let broker = MemoryBroker::new();
        let transport = Arc::new(Transport::new(
            Arc::new(broker.clone()),
            Duration::from_millis(20),
        ));

        let orchestrator = if config.role.runs_orchestrator() {
            let store = Arc::new(
                SqliteJobStore::new(&db_path).expect("Failed to create job store"),
            );
            let orchestrator = Arc::new(JobOrchestrator::new(
                config.orchestrator.clone(),
                store,
                Arc::clone(&transport),
                config.broker.task_topic.clone(),
                config.broker.result_topic.clone(),
            ));
            orchestrator.start().await;
            Some(orchestrator)
        } else {
            None
        };

        let executor = if test_config.enable_executor {
            let executor = TaskExecutor::new(
                ExecutorConfig {
                    name: "test-worker".to_string(),
                    consumers: 2,
                },
                Arc::new(Transport::new(
                    Arc::new(broker.clone()),
                    Duration::from_millis(20),
                )),
                config.broker.task_topic.clone(),
                config.broker.result_topic.clone(),
            );
            executor.start().await;
            Some(executor)
        } else {
            None
        };

        // Create app state
        let state = Arc::new(crackhash_server::state::AppState::new(
            config,
            "0123456789abcdef".to_string(),
            transport,
            orchestrator.clone(),
        ));

        // Create router
        let router = crackhash_server::api::create_router(state);

        Self {
            router,
            broker,
            orchestrator,
            executor,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        TestResponse {
            status,
            body: parse_body(&bytes),
        }
    }

    /// Send a GET request and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Poll a request's status until it leaves IN_PROGRESS.
    pub async fn wait_for_status(&self, request_id: &str) -> TestResponse {
        let path = format!("/api/hash/status?requestId={}", request_id);
        for _ in 0..500 {
            let response = self.get(&path).await;
            if response.body["status"] != "IN_PROGRESS" {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.get(&path).await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        let (status, bytes) = self.send(request).await;

        TestResponse {
            status,
            body: parse_body(&bytes),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, body_bytes.to_vec())
    }
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(bytes).unwrap_or(Value::Null)
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Which components the fixture runs
    pub role: Role,
    /// Run an executor on the fixture's broker
    pub enable_executor: bool,
    /// Parts per new job
    pub worker_count: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            role: Role::Manager,
            enable_executor: false,
            worker_count: 2,
        }
    }
}

impl TestConfig {
    /// Orchestrator and executor in one process.
    pub fn standalone() -> Self {
        Self {
            role: Role::Standalone,
            enable_executor: true,
            ..Self::default()
        }
    }

    /// Executor only; crack endpoints are unavailable.
    pub fn worker() -> Self {
        Self {
            role: Role::Worker,
            enable_executor: true,
            ..Self::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
