use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use tempfile::tempdir;

use hazard_zone::api::{ApiConfig, ApiHandle, ApiServer, ApiState};
use hazard_zone::geometry::Point;
use hazard_zone::pipeline::MonitorStatus;
use hazard_zone::zone::ZoneStore;
use hazard_zone::SharedThreshold;

const SQUARE: &str = r#"{"id":"zone:loading_bay","points":[[0,0],[10,0],[10,10],[0,10]]}"#;
const BOWTIE: &str = r#"{"id":"zone:loading_bay","points":[[0,0],[10,10],[10,0],[0,10]]}"#;

struct TestApi {
    zones: Arc<ZoneStore>,
    threshold: SharedThreshold,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let zones = Arc::new(ZoneStore::new());
        let threshold = SharedThreshold::new(0.2)?;
        let state = ApiState {
            zones: zones.clone(),
            status: Arc::new(MonitorStatus::new()),
            threshold: threshold.clone(),
        };
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };
        let api_handle = ApiServer::new(api_config, state).spawn()?;
        Ok(Self {
            zones,
            threshold,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn send(&self, method: &str, path: &str, token: Option<&str>, body: &str) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
        if let Some(token) = token {
            request.push_str(&format!("Authorization: Bearer {token}\r\n"));
        }
        if !body.is_empty() {
            request.push_str(&format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\n",
                body.len()
            ));
        }
        request.push_str("\r\n");
        request.push_str(body);
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }

    fn authorized(&self, method: &str, path: &str, body: &str) -> Result<(String, Value)> {
        let token = self.handle().token.clone();
        let (headers, body) = self.send(method, path, Some(&token), body)?;
        Ok((headers, serde_json::from_str(&body)?))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

#[test]
fn health_and_status_need_no_token() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.send("GET", "/health", None, "")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(serde_json::from_str::<Value>(&body)?["status"], "ok");

    let (headers, body) = api.send("GET", "/status", None, "")?;
    assert!(headers.contains("200 OK"));
    let status: Value = serde_json::from_str(&body)?;
    assert_eq!(status["state"], "safe");
    assert_eq!(status["frames_processed"], 0);
    assert_eq!(status["zone_id"], Value::Null);
    assert_eq!(status["zone_revision"], 0);
    assert!((status["confidence_threshold"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    Ok(())
}

#[test]
fn zone_lifecycle_over_http() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, _) = api.send("GET", "/zone", None, "")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, zone) = api.authorized("POST", "/zone", SQUARE)?;
    assert!(headers.contains("200 OK"));
    assert_eq!(zone["id"], "zone:loading_bay");
    assert_eq!(zone["revision"], 1);
    assert_eq!(zone["points"].as_array().map(Vec::len), Some(4));
    assert!(api.zones.get_zone().is_some_and(|z| z.contains(Point::new(5.0, 5.0))));

    let (headers, body) = api.send("GET", "/zone", None, "")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(serde_json::from_str::<Value>(&body)?["fingerprint"], zone["fingerprint"]);

    // A self-intersecting zone is refused and the square stays active.
    let (headers, err) = api.authorized("POST", "/zone", BOWTIE)?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(err["error"], "invalid_zone");
    assert_eq!(api.zones.revision(), 1);

    let (headers, err) = api.authorized("POST", "/zone", "{not json")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(err["error"], "invalid_json");

    let (headers, cleared) = api.authorized("DELETE", "/zone", "")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(cleared["cleared"], true);
    assert_eq!(cleared["revision"], 2);
    assert!(api.zones.get_zone().is_none());
    Ok(())
}

#[test]
fn confidence_threshold_is_validated() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.authorized("POST", "/confidence", r#"{"threshold":0.65}"#)?;
    assert!(headers.contains("200 OK"));
    assert!((body["threshold"].as_f64().unwrap() - 0.65).abs() < 1e-6);
    assert!((api.threshold.get() - 0.65).abs() < 1e-6);

    let (headers, body) = api.authorized("POST", "/confidence", r#"{"threshold":1.5}"#)?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(body["error"], "invalid_threshold");
    assert!((api.threshold.get() - 0.65).abs() < 1e-6);
    Ok(())
}

#[test]
fn mutating_routes_require_a_bearer_token() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, _) = api.send("POST", "/zone", None, SQUARE)?;
    assert!(headers.contains("401 Unauthorized"));

    let (headers, _) = api.send("DELETE", "/zone", Some("deadbeef"), "")?;
    assert!(headers.contains("401 Unauthorized"));

    let token = api.handle().token.clone();
    let (headers, body) = api.send("POST", &format!("/confidence?token={token}"), None, r#"{"threshold":0.5}"#)?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains("token_query_param_not_allowed"));

    assert!(api.zones.get_zone().is_none());
    assert!((api.threshold.get() - 0.2).abs() < 1e-6);
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, _) = api.send("GET", "/events", None, "")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = api.send("PUT", "/zone", None, "")?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn token_file_is_written() -> Result<()> {
    let dir = tempdir()?;
    let token_path = dir.path().join("api.token");
    let state = ApiState {
        zones: Arc::new(ZoneStore::new()),
        status: Arc::new(MonitorStatus::new()),
        threshold: SharedThreshold::new(0.2)?,
    };
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            token_path: Some(token_path.clone()),
        },
        state,
    )
    .spawn()?;

    let written = std::fs::read_to_string(&token_path)?;
    assert_eq!(written.trim(), handle.token);
    handle.stop()?;
    Ok(())
}
