//! Read-only HTTP API.
//!
//! - `GET /frame/latest` (also `/`): latest broadcast frame as JSON
//! - `GET /health`: liveness plus pipeline counters

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::pipeline::{LatestFrame, PipelineStats, StatsSnapshot};
use crate::shutdown::StopToken;

const MAX_REQUEST_BYTES: usize = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8780".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: StopToken,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.stop();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("http api thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    latest: LatestFrame,
    stats: Arc<PipelineStats>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    uptime_s: u64,
    stats: StatsSnapshot,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, latest: LatestFrame, stats: Arc<PipelineStats>) -> Self {
        Self { cfg, latest, stats }
    }

    /// Bind and serve on a background thread. Bind failure is `ResourceUnavailable`.
    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid http address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr).map_err(|e| {
            PipelineError::ResourceUnavailable(format!("http bind {}: {}", configured_addr, e))
        })?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = StopToken::new();
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("http".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &self.latest, &self.stats, &shutdown_thread) {
                    log::error!("http api stopped: {}", err);
                }
            })
            .context("spawn http thread")?;

        log::info!("http api listening on http://{}/frame/latest", addr);
        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    latest: &LatestFrame,
    stats: &PipelineStats,
    shutdown: &StopToken,
) -> Result<()> {
    let started = Instant::now();
    loop {
        if shutdown.is_stopped() {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, latest, stats, started) {
                    log::warn!("http request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    latest: &LatestFrame,
    stats: &PipelineStats,
    started: Instant,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/health" => {
            let body = HealthBody {
                status: "ok",
                uptime_s: started.elapsed().as_secs(),
                stats: stats.snapshot(),
            };
            let payload = serde_json::to_vec(&body)?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        "/" | "/frame/latest" => match latest.snapshot() {
            Some(frame) => {
                let payload = serde_json::to_vec(&frame)?;
                write_response(&mut stream, 200, "application/json", &payload)?;
            }
            None => write_json_response(&mut stream, 404, r#"{"error":"no_frame"}"#)?,
        },
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?,
    }
    Ok(())
}

struct HttpRequest {
    method: String,
    path: String,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
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
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
