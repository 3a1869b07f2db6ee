use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_codebase() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    std::fs::create_dir_all(root.join("src")).unwrap();
    std::fs::write(
        root.join("src/main.rs"),
        r#"
fn hello_world() {
    println!("Hello, world!");
}

fn add(a: i32, b: i32) -> i32 {
    a + b
}
"#,
    )
    .unwrap();

    dir
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn wait_for_service(base_url: &str, timeout: Duration) -> bool {
    let client = reqwest::blocking::Client::new();
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if client.get(format!("{base_url}/status")).send().is_ok() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn service_lifecycle_register_index_query() {
    let codebase = create_test_codebase();
    let port = free_port();
    let base_url = format!("http://127.0.0.1:{port}");

    let mut service = Command::new(env!("CARGO_BIN_EXE_semindex-service"))
        .args(["--port", &port.to_string()])
        .spawn()
        .expect("failed to start semindex-service");

    assert!(wait_for_service(&base_url, Duration::from_secs(5)), "service failed to start");

    let client = reqwest::blocking::Client::new();

    let register: serde_json::Value = client
        .post(format!("{base_url}/collections"))
        .json(&serde_json::json!({
            "name": "test-collection",
            "codebase_path": codebase.path().to_string_lossy(),
        }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(register["registered"].as_bool(), Some(true));

    let summary: serde_json::Value = client
        .post(format!("{base_url}/collections/test-collection/index"))
        .json(&serde_json::json!({ "full": true }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(summary["files_indexed"].as_u64(), Some(1));
    assert!(summary["chunks_created"].as_u64().unwrap_or(0) > 0);
    assert_eq!(summary["status"].as_str(), Some("completed"));

    let query: serde_json::Value = client
        .post(format!("{base_url}/query"))
        .json(&serde_json::json!({
            "collection": "test-collection",
            "query": "hello world",
        }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    let results = query.as_array().expect("query response should be an array");
    assert!(!results.is_empty(), "expected at least one query match");
    assert!(results[0]["relative_path"].as_str().unwrap().ends_with("main.rs"));

    let status: serde_json::Value = client
        .get(format!("{base_url}/collections/test-collection/status"))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(status["name"].as_str(), Some("test-collection"));
    assert!(status["points_count"].as_u64().unwrap_or(0) > 0);

    let service_status: serde_json::Value =
        client.get(format!("{base_url}/status")).send().unwrap().json().unwrap();
    assert_eq!(service_status["status"].as_str(), Some("ok"));
    assert_eq!(service_status["collections_registered"].as_u64(), Some(1));

    service.kill().ok();
}

#[test]
fn duplicate_registration_is_a_conflict() {
    let codebase = create_test_codebase();
    let port = free_port();
    let base_url = format!("http://127.0.0.1:{port}");

    let mut service = Command::new(env!("CARGO_BIN_EXE_semindex-service"))
        .args(["--port", &port.to_string()])
        .spawn()
        .expect("failed to start semindex-service");
    assert!(wait_for_service(&base_url, Duration::from_secs(5)), "service failed to start");

    let client = reqwest::blocking::Client::new();
    let body = serde_json::json!({
        "name": "dup-collection",
        "codebase_path": codebase.path().to_string_lossy(),
    });

    let first = client.post(format!("{base_url}/collections")).json(&body).send().unwrap();
    assert!(first.status().is_success());

    let second = client.post(format!("{base_url}/collections")).json(&body).send().unwrap();
    assert_eq!(second.status().as_u16(), 409);
    let envelope: serde_json::Value = second.json().unwrap();
    assert_eq!(envelope["code"].as_str(), Some("collection_exists"));

    service.kill().ok();
}

#[test]
fn mutating_routes_require_api_key_when_configured() {
    let codebase = create_test_codebase();
    let port = free_port();
    let base_url = format!("http://127.0.0.1:{port}");

    let mut service = Command::new(env!("CARGO_BIN_EXE_semindex-service"))
        .args(["--port", &port.to_string(), "--api-key", "test-secret"])
        .spawn()
        .expect("failed to start semindex-service");
    assert!(wait_for_service(&base_url, Duration::from_secs(5)), "service failed to start");

    let client = reqwest::blocking::Client::new();
    let body = serde_json::json!({
        "name": "guarded-collection",
        "codebase_path": codebase.path().to_string_lossy(),
    });

    let unauthorized =
        client.post(format!("{base_url}/collections")).json(&body).send().unwrap();
    assert_eq!(unauthorized.status().as_u16(), 401);

    let authorized = client
        .post(format!("{base_url}/collections"))
        .header("x-api-key", "test-secret")
        .json(&body)
        .send()
        .unwrap();
    assert!(authorized.status().is_success());

    // /query stays public even with an API key configured.
    let query = client
        .post(format!("{base_url}/query"))
        .json(&serde_json::json!({ "collection": "guarded-collection", "query": "anything" }))
        .send()
        .unwrap();
    assert!(query.status().is_success());

    service.kill().ok();
}
