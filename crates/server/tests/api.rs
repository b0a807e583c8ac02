use reqwest::StatusCode;
use s3gate::{router, AppState};
use s3gate_core::{parse_config, FileGateway, MemoryBackend};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tempfile::{tempdir, NamedTempFile};
use tokio::net::TcpListener;

const CONFIG: &str = r#"
[storage]
endpoint = "localhost:9000"
access_key_id = "minio"
secret_access_key = "minio123"
bucket = "testbucket"
enable_multipart_upload = true
file_chunk_size = 5

[server]
cors_allowed_clients = ["*"]
"#;

async fn spawn_with(config: &str, backend: Arc<MemoryBackend>) -> String {
    let config = parse_config(config).unwrap();
    let state = Arc::new(AppState {
        gateway: FileGateway::new(&config, backend),
        show_progress: false,
    });
    let app = router(state, &config.server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

async fn spawn(backend: Arc<MemoryBackend>) -> String {
    spawn_with(CONFIG, backend).await
}

fn source_file(contents: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
}

fn upload_body(bucket: &str, object: &str, file: &NamedTempFile) -> Value {
    json!({
        "bucketName": bucket,
        "objectName": object,
        "filepath": file.path().to_str().unwrap(),
        "contentType": "application/octet-stream",
    })
}

#[tokio::test]
async fn test_home_and_health() {
    let base = spawn(Arc::new(MemoryBackend::new())).await;

    let home = reqwest::get(format!("{}/", base)).await.unwrap();
    assert_eq!(home.status(), StatusCode::OK);
    assert_eq!(home.text().await.unwrap(), "home");

    let health = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(health.text().await.unwrap(), "healthy");
}

#[tokio::test]
async fn test_upload_reports_first_missing_field() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("testbucket"));
    let base = spawn(backend.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/files", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Insert valid bucket name");

    let response = client
        .post(format!("{}/files", base))
        .json(&json!({ "bucketName": "b", "objectName": "o" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Insert valid filepath");

    let response = client
        .post(format!("{}/files", base))
        .json(&json!({ "objectName": "o", "filepath": "/tmp/f", "contentType": "text/plain" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Insert valid bucket name");

    let response = client
        .post(format!("{}/files", base))
        .json(&json!({ "bucketName": "testbucket", "objectName": "o", "filepath": "/tmp/f" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Insert valid content type");
    assert_eq!(backend.put_calls(), 0);
}

#[tokio::test]
async fn test_upload_to_missing_bucket() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("testbucket"));
    let base = spawn(backend.clone()).await;
    let file = source_file(b"hello");

    let response = reqwest::Client::new()
        .post(format!("{}/files", base))
        .json(&upload_body("nosuchbucket", "o", &file))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.text().await.unwrap(),
        "bucket nosuchbucket does not exist"
    );
    assert_eq!(backend.put_calls(), 0);
    assert_eq!(backend.part_calls(), 0);
}

#[tokio::test]
async fn test_undecodable_body() {
    let base = spawn(Arc::new(MemoryBackend::new())).await;

    let response = reqwest::Client::new()
        .post(format!("{}/files", base))
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!response.text().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_list_download() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("testbucket"));
    let base = spawn(backend.clone()).await;
    let client = reqwest::Client::new();
    let file = source_file(b"%PDF-1.7 small report");

    let response = client
        .post(format!("{}/files", base))
        .json(&upload_body("testbucket", "report.pdf", &file))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["multipart"], json!(false));
    assert_eq!(outcome["size"], json!(21));

    let listing: Value = client
        .get(format!("{}/files", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = listing
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["report.pdf"]);

    let dir = tempdir().unwrap();
    let dest = dir.path().join("report.pdf");
    let dest_str = dest.to_str().unwrap().to_string();
    let response = client
        .get(format!("{}/files/report.pdf", base))
        .json(&json!({ "bucketName": "testbucket", "downloadPath": dest_str }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        format!("File report.pdf correctly downloaded in: {}", dest_str)
    );
    assert_eq!(std::fs::read(&dest).unwrap(), b"%PDF-1.7 small report");
}

#[tokio::test]
async fn test_download_without_body() {
    let base = spawn(Arc::new(MemoryBackend::new().with_bucket("testbucket"))).await;

    let response = reqwest::Client::new()
        .get(format!("{}/files/report.pdf", base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "No Request JSON Body");
}

#[tokio::test]
async fn test_download_missing_file() {
    let base = spawn(Arc::new(MemoryBackend::new().with_bucket("testbucket"))).await;
    let dir = tempdir().unwrap();

    let response = reqwest::Client::new()
        .get(format!("{}/files/report.pdf", base))
        .json(&json!({
            "bucketName": "testbucket",
            "downloadPath": dir.path().join("report.pdf").to_str().unwrap(),
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.text().await.unwrap(),
        "Specified file report.pdf is not present in bucket testbucket"
    );
    assert!(!dir.path().join("report.pdf").exists());
}

#[tokio::test]
async fn test_download_validation_order() {
    let base = spawn(Arc::new(MemoryBackend::new().with_bucket("testbucket"))).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/files/report.pdf", base))
        .json(&json!({ "downloadPath": "/tmp/x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "Insert valid bucket name");

    let response = client
        .get(format!("{}/files/report.pdf", base))
        .json(&json!({ "bucketName": "testbucket" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.text().await.unwrap(),
        "Insert valid download folder path"
    );
}

#[tokio::test]
async fn test_unreachable_store_is_internal_error() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("testbucket"));
    backend.set_unavailable(true);
    let base = spawn(backend).await;
    let file = source_file(b"x");

    let response = reqwest::Client::new()
        .post(format!("{}/files", base))
        .json(&upload_body("testbucket", "o", &file))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text().await.unwrap(), "Internal Server Error");

    let response = reqwest::get(format!("{}/files", base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_nested_keys_and_delete() {
    let backend = Arc::new(MemoryBackend::new().with_bucket("testbucket"));
    backend.insert_object("testbucket", "docs/2024/notes.txt", "notes");
    let base = spawn(backend.clone()).await;
    let client = reqwest::Client::new();

    let response = client
        .delete(format!("{}/files/docs/2024/notes.txt", base))
        .json(&json!({ "bucketName": "testbucket" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(backend.object("testbucket", "docs/2024/notes.txt").is_none());

    let response = client
        .delete(format!("{}/files/a.txt", base))
        .json(&json!({ "bucketName": "missing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "bucket missing does not exist");
}

#[tokio::test]
async fn test_create_bucket_twice() {
    let backend = Arc::new(MemoryBackend::new());
    let base = spawn(backend.clone()).await;
    let client = reqwest::Client::new();
    let bucket = format!("bucket-{}", uuid::Uuid::new_v4());

    for _ in 0..2 {
        let response = client
            .post(format!("{}/buckets", base))
            .json(&json!({ "bucketName": bucket }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert!(backend.object(&bucket, "anything").is_none());
    backend.insert_object(&bucket, "a.txt", "a");
    assert!(backend.object(&bucket, "a.txt").is_some());

    let response = client
        .post(format!("{}/buckets", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "Insert valid bucket name");
}

#[tokio::test]
async fn test_routes_mounted_under_api_prefix() {
    let config = format!(
        "{}api_path = \"api\"\napi_version = \"v1\"\n",
        CONFIG
    );
    let backend = Arc::new(MemoryBackend::new().with_bucket("testbucket"));
    backend.insert_object("testbucket", "a.txt", "a");
    let base = spawn_with(&config, backend).await;

    let response = reqwest::get(format!("{}/api/v1/files", base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = reqwest::get(format!("{}/files", base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
