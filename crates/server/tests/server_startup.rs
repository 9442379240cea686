use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a standalone config keeping every file inside `dir`
fn standalone_config(dir: &Path, port: u16) -> String {
    format!(
        r#"
role = "standalone"

[server]
host = "127.0.0.1"
port = {port}

[database]
path = "{db}"

[broker]
backend = "sqlite"
path = "{broker}"
poll_interval_ms = 20

[orchestrator]
worker_count = 2
alphabet = ["a", "b"]
"#,
        port = port,
        db = dir.join("jobs.db").display(),
        broker = dir.join("broker.db").display(),
    )
}

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_crackhash"))
        .env("CRACKHASH_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Run the binary to completion with the given config path
async fn run_to_exit(config_path: &Path) -> std::process::Output {
    timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_crackhash"))
            .env("CRACKHASH_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command")
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_config(&dir, &standalone_config(dir.path(), port));

    let mut server = spawn_server(&config_path).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/api/health", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["role"], "standalone");
    assert_eq!(json["config_hash"].as_str().unwrap().len(), 16);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_returns_sanitized() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_config(&dir, &standalone_config(dir.path(), port));

    let mut server = spawn_server(&config_path).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .get(format!("http://127.0.0.1:{}/api/config", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["server"]["port"], port);
    assert_eq!(json["broker"]["backend"], "sqlite");
    assert!(json["broker"].get("path").is_none());
    assert_eq!(json["orchestrator"]["alphabet"], "ab");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_standalone_server_cracks_digest() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_config(&dir, &standalone_config(dir.path(), port));

    let mut server = spawn_server(&config_path).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    // md5("ab")
    let response = client
        .post(format!("http://127.0.0.1:{}/api/hash/crack", port))
        .json(&json!({ "hash": "187ef4436122d1cc2f40dc2b92f0eba0", "maxLength": 2 }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let json: serde_json::Value = response.json().await.unwrap();
    let request_id = json["requestId"].as_str().unwrap().to_string();

    let mut status = serde_json::Value::Null;
    for _ in 0..100 {
        status = client
            .get(format!(
                "http://127.0.0.1:{}/api/hash/status?requestId={}",
                port, request_id
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["status"] != "IN_PROGRESS" {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(status["status"], "READY");
    assert_eq!(status["data"], json!(["ab"]));
    assert_eq!(status["progress"], "100%");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = run_to_exit(Path::new("/nonexistent/config.toml")).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_config_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(
        &dir,
        r#"
[orchestrator]
worker_count = 0
"#,
    );

    let result = run_to_exit(&config_path).await;
    assert!(!result.status.success());
}
