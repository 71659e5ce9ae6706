//! Loopback operator API.
//!
//! Read routes (`/health`, `/status`, `GET /zone`) are open to local
//! callers. Mutating routes (`POST /zone`, `DELETE /zone`,
//! `POST /confidence`) need the capability token as a bearer header.

use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::breach::SharedThreshold;
use crate::geometry::Point;
use crate::pipeline::{MonitorStatus, StatusSnapshot};
use crate::zone::{Zone, ZoneFile, ZoneStore};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub token_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8799".to_string(),
            token_path: None,
        }
    }
}

/// Shared handles the API reads and mutates.
#[derive(Clone)]
pub struct ApiState {
    pub zones: Arc<ZoneStore>,
    pub status: Arc<MonitorStatus>,
    pub threshold: SharedThreshold,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
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

/// Random 32-byte bearer token, generated once per server start.
#[derive(Clone, Debug)]
pub struct CapabilityToken {
    token: [u8; 32],
}

impl CapabilityToken {
    pub fn generate() -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        Self { token }
    }

    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }

    pub fn validate(&self, presented: &str) -> Result<()> {
        let presented = parse_hex32(presented)?;
        if presented != self.token {
            return Err(anyhow!("capability token invalid"));
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let capability = CapabilityToken::generate();
        let token = capability.token_hex();
        if let Some(path) = &self.cfg.token_path {
            write_token_file(path, &token)?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &state, &capability, shutdown_thread) {
                log::error!("operator api stopped: {}", err);
            }
        });
        log::info!("operator api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            token,
            token_path: self.cfg.token_path,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    state: &ApiState,
    capability: &CapabilityToken,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, state, capability) {
                    log::warn!("operator api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    #[serde(flatten)]
    monitor: &'a StatusSnapshot,
    zone_id: Option<String>,
    zone_revision: u64,
    confidence_threshold: f32,
}

#[derive(Serialize)]
struct ZoneResponse<'a> {
    id: &'a str,
    revision: u64,
    fingerprint: String,
    points: &'a [Point],
}

impl<'a> ZoneResponse<'a> {
    fn new(zone: &'a Zone) -> Self {
        Self {
            id: zone.id(),
            revision: zone.revision(),
            fingerprint: zone.fingerprint(),
            points: zone.polygon().vertices(),
        }
    }
}

#[derive(Deserialize)]
struct ConfidenceRequest {
    threshold: f32,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn handle_connection(
    mut stream: TcpStream,
    state: &ApiState,
    capability: &CapabilityToken,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    let mutating = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") | ("GET", "/status") | ("GET", "/zone") => false,
        ("POST", "/zone") | ("DELETE", "/zone") | ("POST", "/confidence") => true,
        (_, "/health") | (_, "/status") | (_, "/zone") | (_, "/confidence") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
            return Ok(());
        }
        _ => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };

    if mutating {
        if request.has_query_token() {
            write_json_response(
                &mut stream,
                400,
                r#"{"error":"token_query_param_not_allowed"}"#,
            )?;
            return Ok(());
        }
        let token = match request.bearer_token() {
            Some(token) => token,
            None => {
                write_json_response(&mut stream, 401, r#"{"error":"missing_token"}"#)?;
                return Ok(());
            }
        };
        if let Err(err) = capability.validate(&token) {
            write_json_response(&mut stream, 401, r#"{"error":"invalid_token"}"#)?;
            return Err(err);
        }
    }

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/status") => {
            let monitor = state.status.snapshot();
            let (zone, zone_revision) = state.zones.snapshot();
            let body = StatusResponse {
                monitor: &monitor,
                zone_id: zone.map(|z| z.id().to_string()),
                zone_revision,
                confidence_threshold: state.threshold.get(),
            };
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        ("GET", "/zone") => match state.zones.get_zone() {
            Some(zone) => {
                let body = serde_json::to_vec(&ZoneResponse::new(&zone))?;
                write_response(&mut stream, 200, "application/json", &body)
            }
            None => write_json_response(&mut stream, 404, r#"{"error":"no_zone"}"#),
        },
        ("POST", "/zone") => {
            let file: ZoneFile = match serde_json::from_slice(&request.body) {
                Ok(file) => file,
                Err(err) => return write_error(&mut stream, 400, "invalid_json", err.to_string()),
            };
            match state.zones.set_zone(&file.id, file.points) {
                Ok(zone) => {
                    log::info!("zone {} set via operator api", zone.id());
                    let body = serde_json::to_vec(&ZoneResponse::new(&zone))?;
                    write_response(&mut stream, 200, "application/json", &body)
                }
                Err(err) => write_error(&mut stream, 400, "invalid_zone", err.to_string()),
            }
        }
        ("DELETE", "/zone") => {
            let cleared = state.zones.get_zone().is_some();
            state.zones.clear_zone();
            let body = serde_json::json!({ "cleared": cleared, "revision": state.zones.revision() });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        ("POST", "/confidence") => {
            let req: ConfidenceRequest = match serde_json::from_slice(&request.body) {
                Ok(req) => req,
                Err(err) => return write_error(&mut stream, 400, "invalid_json", err.to_string()),
            };
            match state.threshold.set(req.threshold) {
                Ok(()) => {
                    let body = serde_json::json!({ "threshold": state.threshold.get() });
                    write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
                }
                Err(err) => write_error(&mut stream, 400, "invalid_threshold", err.to_string()),
            }
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data.len();
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_HEADER_BYTES + MAX_BODY_BYTES {
            return Err(anyhow!("request too large"));
        }
    };
    if header_end > MAX_HEADER_BYTES {
        return Err(anyhow!("request headers too large"));
    }

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
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
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let body_start = (header_end + 4).min(data.len());
    let mut body = data[body_start..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("request body truncated"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_uppercase(),
        path,
        headers,
        raw_path: raw_path.to_string(),
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, error: &str, detail: String) -> Result<()> {
    let body = serde_json::to_vec(&ErrorResponse {
        error,
        detail: Some(detail),
    })?;
    write_response(stream, status, "application/json", &body)
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
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
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
    headers: HashMap<String, String>,
    raw_path: String,
    body: Vec<u8>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    fn has_query_token(&self) -> bool {
        if let Some(query) = self.raw_path.split('?').nth(1) {
            for pair in query.split('&') {
                if let Some((k, _)) = pair.split_once('=') {
                    if k == "token" {
                        return true;
                    }
                }
            }
        }
        false
    }
}

fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn parse_hex32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    if bytes.len() != 32 {
        return Err(anyhow!("token must be 32 bytes"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
