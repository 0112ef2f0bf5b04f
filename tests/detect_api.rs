use anyhow::Result;
use serde_json::Value;
use std::io::{Cursor, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use wildlife_detect::api::{ApiConfig, ApiHandle, ApiServer, DetectResponse};
use wildlife_detect::{
    BoundingBox, DetectionCandidate, ImageStore, PipelineSettings, ResultCollection, ResultStore,
    SharedDetector, SqliteStore, StubBackend,
};

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([5, 5, 5]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn start_server(db_path: &str) -> Result<ApiHandle> {
    start_server_with(db_path, pig_detector())
}

fn start_server_with(db_path: &str, detector: SharedDetector) -> Result<ApiHandle> {
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        db_path: db_path.to_string(),
        settings: PipelineSettings::default(),
        ..ApiConfig::default()
    };
    ApiServer::new(cfg, detector).spawn()
}

fn pig_detector() -> SharedDetector {
    let backend = StubBackend::new().with_script(
        16,
        16,
        vec![DetectionCandidate::new(
            BoundingBox::new(2.0, 2.0, 10.0, 10.0),
            0.97,
            1,
        )],
    );
    Arc::new(Mutex::new(backend))
}

fn send(addr: SocketAddr, raw: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(raw.as_bytes())?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or_default().to_string();
    let body = parts.next().unwrap_or_default().to_string();
    Ok((head, body))
}

fn post_json(addr: SocketAddr, path: &str, body: &str) -> Result<(String, String)> {
    let raw = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
        path = path,
        len = body.len(),
        body = body
    );
    send(addr, &raw)
}

#[test]
fn detect_endpoint_reports_processed_count() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("api.db").to_string_lossy().to_string();
    let (hit, miss) = {
        let mut store = SqliteStore::open(&db_path)?;
        (
            store.insert_image("pig.png", &png(16, 16))?,
            store.insert_image("nothing.png", &png(8, 8))?,
        )
    };

    let handle = start_server(&db_path)?;
    let body = serde_json::json!({
        "image_ids": [hit.as_str(), "0123456789abcdef01234567", miss.as_str()],
    })
    .to_string();
    let (head, body) = post_json(handle.addr, "/detect", &body)?;
    handle.stop()?;

    assert!(head.starts_with("HTTP/1.1 200"), "unexpected head: {}", head);
    let response: DetectResponse = serde_json::from_str(&body)?;
    assert_eq!(response.image_count, 2);
    assert_eq!(response.requested_count, 3);
    assert!(response.results.is_none());
    assert!(response.message.contains("Detection completed"));

    let store = SqliteStore::open(&db_path)?;
    let ok = store.results(ResultCollection::Success, 10)?;
    let failed = store.results(ResultCollection::Failure, 10)?;
    assert_eq!(ok.len(), 1);
    assert_eq!(ok[0].image_id(), hit.as_str());
    assert_eq!(ok[0].object_counts().pig, 1);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].image_id(), miss.as_str());
    Ok(())
}

#[test]
fn included_results_encode_images_as_base64_text() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("api.db").to_string_lossy().to_string();
    let hit = SqliteStore::open(&db_path)?.insert_image("pig.png", &png(16, 16))?;

    let handle = start_server(&db_path)?;
    let body = serde_json::json!({
        "image_ids": [hit.as_str()],
        "include_results": true,
    })
    .to_string();
    let (_, body) = post_json(handle.addr, "/detect", &body)?;
    handle.stop()?;

    let value: Value = serde_json::from_str(&body)?;
    let result = &value["results"][0];
    assert_eq!(result["status"], "Success");
    assert_eq!(result["image_id"], hit.as_str());
    assert_eq!(result["detections"][0]["class_name"], "pig");
    let image = result["annotated_image"]
        .as_str()
        .expect("annotated image should be a string");
    // JPEG SOI marker in base64.
    assert!(image.starts_with("/9j/"));
    Ok(())
}

#[test]
fn rejects_bad_requests() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("api.db").to_string_lossy().to_string();
    let handle = start_server(&db_path)?;

    let (head, body) = send(
        handle.addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )?;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(body.contains("ok"));

    let (head, _) = post_json(handle.addr, "/detect", "{not json")?;
    assert!(head.starts_with("HTTP/1.1 400"));

    let (head, _) = send(
        handle.addr,
        "GET /detect HTTP/1.1\r\nHost: localhost\r\n\r\n",
    )?;
    assert!(head.starts_with("HTTP/1.1 405"));

    let (head, _) = post_json(handle.addr, "/nowhere", "{}")?;
    assert!(head.starts_with("HTTP/1.1 404"));

    handle.stop()?;
    Ok(())
}

#[test]
fn unusable_detector_yields_server_error() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("api.db").to_string_lossy().to_string();
    let hit = SqliteStore::open(&db_path)?.insert_image("pig.png", &png(16, 16))?;

    let detector = pig_detector();
    let poison = detector.clone();
    let _ = std::thread::spawn(move || {
        let _guard = poison.lock().unwrap();
        panic!("detector thread died");
    })
    .join();

    let handle = start_server_with(&db_path, detector)?;
    let body = serde_json::json!({ "image_ids": [hit.as_str()] }).to_string();
    let (head, body) = post_json(handle.addr, "/detect", &body)?;
    handle.stop()?;

    assert!(head.starts_with("HTTP/1.1 500"), "unexpected head: {}", head);
    let value: Value = serde_json::from_str(&body)?;
    assert!(value["error"]
        .as_str()
        .is_some_and(|msg| msg.contains("detector lock poisoned")));

    let store = SqliteStore::open(&db_path)?;
    assert!(store.results(ResultCollection::Success, 10)?.is_empty());
    assert!(store.results(ResultCollection::Failure, 10)?.is_empty());
    Ok(())
}
