use crate::detect::SharedDetector;
use crate::model::ImageResult;
use crate::pipeline::{BatchOrchestrator, PipelineSettings};
use crate::storage::SqliteStore;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

pub const DETECT_COMPLETED_MESSAGE: &str = "Detection completed and results saved";

/// Body of `POST /detect`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectRequest {
    pub image_ids: Vec<String>,
    #[serde(default)]
    pub include_results: bool,
}

/// Response of `POST /detect`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub message: String,
    /// Images actually processed, not requested.
    pub image_count: usize,
    pub requested_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<ImageResult>>,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub db_path: String,
    pub max_body_bytes: usize,
    pub settings: PipelineSettings,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            db_path: "images.db".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            settings: PipelineSettings::default(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    detector: SharedDetector,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, detector: SharedDetector) -> Self {
        Self { cfg, detector }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        // Open once up front so schema or path problems fail the spawn, not the first request.
        let store = SqliteStore::open(&self.cfg.db_path)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let detector = self.detector;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, store, &cfg, detector, shutdown_thread) {
                log::error!("detect api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    mut store: SqliteStore,
    cfg: &ApiConfig,
    detector: SharedDetector,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &mut store, cfg, &detector) {
                    log::warn!("detect api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    log::info!("detect api shut down");
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    store: &mut SqliteStore,
    cfg: &ApiConfig,
    detector: &SharedDetector,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge) => {
            write_json_response(&mut stream, 413, r#"{"error":"payload_too_large"}"#)?;
            return Err(anyhow!("request too large"));
        }
        Err(RequestError::Malformed(err)) => {
            write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?;
        }
        ("POST", "/detect") => {
            let body: DetectRequest = match serde_json::from_slice(&request.body) {
                Ok(body) => body,
                Err(err) => {
                    write_json_response(&mut stream, 400, r#"{"error":"invalid_json"}"#)?;
                    return Err(anyhow!("invalid detect request body: {}", err));
                }
            };
            handle_detect(&mut stream, store, cfg, detector, body)?;
        }
        (_, "/health") | (_, "/detect") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
        }
    }
    Ok(())
}

fn handle_detect(
    stream: &mut TcpStream,
    store: &mut SqliteStore,
    cfg: &ApiConfig,
    detector: &SharedDetector,
    body: DetectRequest,
) -> Result<()> {
    log::info!("detect request for {} image id(s)", body.image_ids.len());
    let mut orchestrator = BatchOrchestrator::new(store, detector.clone(), cfg.settings);
    let summary = match orchestrator.run(&body.image_ids) {
        Ok(summary) => summary,
        Err(err) => {
            log::error!("detect batch failed: {:#}", err);
            let payload = serde_json::to_vec(&serde_json::json!({
                "error": format!("{:#}", err),
            }))?;
            write_response(stream, 500, "application/json", &payload)?;
            return Ok(());
        }
    };

    let response = DetectResponse {
        message: DETECT_COMPLETED_MESSAGE.to_string(),
        image_count: summary.image_count,
        requested_count: summary.requested,
        results: body.include_results.then_some(summary.results),
    };
    let payload = serde_json::to_vec(&response)?;
    write_response(stream, 200, "application/json", &payload)
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(anyhow::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Malformed(err.into())
    }
}

fn read_request(
    stream: &mut TcpStream,
    max_body_bytes: usize,
) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(anyhow!("connection closed before headers")));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("empty request")))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("missing method")))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("missing path")))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(anyhow!("invalid content-length")))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(RequestError::TooLarge);
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(anyhow!("connection closed mid-body")));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
