//! Integration tests for the semindex-client service-mode register/index/query flow.
//!
//! These tests spin up a real semindex-service, register a codebase, run an
//! index, and verify that `ServiceClient` round-trips the wire format.

use semindex_client::ServiceClient;
use semindex_core::query::QueryOptions;
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

    std::fs::write(
        root.join("src/lib.rs"),
        r#"
pub fn multiply(a: i32, b: i32) -> i32 {
    a * b
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

/// Find the semindex-service binary next to the test binary.
fn service_binary() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // test binary name
    path.pop(); // deps/
    path.push("semindex-service");
    path
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

struct TestService {
    _process: std::process::Child,
    base_url: String,
    _codebase_dir: TempDir,
    codebase_path: std::path::PathBuf,
}

impl TestService {
    fn start(codebase_dir: TempDir) -> Self {
        let port = free_port();
        let base_url = format!("http://127.0.0.1:{port}");
        let bin = service_binary();
        assert!(bin.exists(), "semindex-service binary not found at {bin:?}");

        let process = Command::new(&bin)
            .args(["--port", &port.to_string()])
            .spawn()
            .expect("failed to start semindex-service");

        assert!(
            wait_for_service(&base_url, Duration::from_secs(5)),
            "service failed to start"
        );

        let codebase_path = codebase_dir.path().to_path_buf();
        TestService { _process: process, base_url, _codebase_dir: codebase_dir, codebase_path }
    }

    fn client(&self) -> ServiceClient {
        ServiceClient::new(&self.base_url, None)
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        self._process.kill().ok();
    }
}

#[test]
fn register_index_and_query_round_trip() {
    let codebase = create_test_codebase();
    let svc = TestService::start(codebase);
    let client = svc.client();

    client
        .register_collection("test-collection", &svc.codebase_path.to_string_lossy())
        .expect("register_collection should succeed");

    let summary = client.index("test-collection", true).expect("index should succeed");
    assert_eq!(summary.files_indexed, 2);
    assert!(summary.chunks_created > 0);
    assert!(summary.errors.is_empty());

    let results = client
        .query("test-collection", "hello world", QueryOptions::default())
        .expect("query should succeed");
    assert!(!results.is_empty(), "expected at least one match for hello world");
    assert!(results.iter().any(|r| r.relative_path.ends_with("main.rs")));
}

#[test]
fn register_is_idempotent() {
    let codebase = create_test_codebase();
    let svc = TestService::start(codebase);
    let client = svc.client();

    client
        .register_collection("dup-collection", &svc.codebase_path.to_string_lossy())
        .expect("first register should succeed");
    client
        .register_collection("dup-collection", &svc.codebase_path.to_string_lossy())
        .expect("re-registering the same collection should be treated as success");
}

#[test]
fn collection_status_reflects_index_run() {
    let codebase = create_test_codebase();
    let svc = TestService::start(codebase);
    let client = svc.client();

    client
        .register_collection("status-collection", &svc.codebase_path.to_string_lossy())
        .expect("register_collection should succeed");
    client.index("status-collection", true).expect("index should succeed");

    let status = client
        .collection_status("status-collection")
        .expect("collection_status should succeed");
    assert_eq!(status.name, "status-collection");
    assert!(status.points_count > 0);
}

#[test]
fn unknown_collection_status_is_a_service_error() {
    let codebase = create_test_codebase();
    let svc = TestService::start(codebase);
    let client = svc.client();

    let err = client
        .collection_status("never-registered")
        .expect_err("status on an unregistered collection should fail");
    assert!(semindex_client::service_client::is_error_code(&err, "collection_not_found"));
}

#[test]
fn service_status_reports_registered_collections() {
    let codebase = create_test_codebase();
    let svc = TestService::start(codebase);
    let client = svc.client();

    client
        .register_collection("count-me", &svc.codebase_path.to_string_lossy())
        .expect("register_collection should succeed");

    let status = client.service_status().expect("service_status should succeed");
    assert_eq!(status.status, "ok");
    assert!(status.collections_registered >= 1);
}
