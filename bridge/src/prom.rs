use crate::algorithm::Algorithm;
use crate::client_session::SessionSummary;
use crate::job_manager::JobManager;
use crate::net_utils::bind_addr_from_port;
use crate::session_registry::SessionRegistry;
use chrono::{DateTime, Utc};
use prometheus::{CounterVec, Gauge, register_counter_vec, register_gauge};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Once, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Algorithm label for per-algorithm metrics
const ALGORITHM_LABELS: &[&str] = &["algorithm"];

/// Worker labels for per-wallet metrics
const WORKER_LABELS: &[&str] = &["algorithm", "wallet"];

/// Error labels
const ERROR_LABELS: &[&str] = &["wallet", "error"];

static ACTIVE_SESSIONS: OnceLock<Gauge> = OnceLock::new();
static LIVE_JOBS: OnceLock<Gauge> = OnceLock::new();
static JOBS_MINTED: OnceLock<CounterVec> = OnceLock::new();
static JOBS_SENT: OnceLock<CounterVec> = OnceLock::new();
static SHARES_ACCEPTED: OnceLock<CounterVec> = OnceLock::new();
static SHARES_REJECTED: OnceLock<CounterVec> = OnceLock::new();
static DISCONNECTS: OnceLock<CounterVec> = OnceLock::new();
static WORKER_ERRORS: OnceLock<CounterVec> = OnceLock::new();
static NODE_SYNCED: OnceLock<Gauge> = OnceLock::new();
static NODE_SYNC_PROGRESS: OnceLock<Gauge> = OnceLock::new();

static INIT: Once = Once::new();

/// Register every bridge metric with the default registry. Safe to call repeatedly.
pub fn init_metrics() {
    INIT.call_once(|| {
        if let Ok(g) = register_gauge!("vb_active_sessions", "Number of connected miner sessions") {
            let _ = ACTIVE_SESSIONS.set(g);
        }
        if let Ok(g) = register_gauge!("vb_live_jobs", "Number of jobs currently accepted for submission") {
            let _ = LIVE_JOBS.set(g);
        }
        if let Ok(c) = register_counter_vec!("vb_jobs_minted_total", "Jobs created from node templates", ALGORITHM_LABELS) {
            let _ = JOBS_MINTED.set(c);
        }
        if let Ok(c) = register_counter_vec!("vb_jobs_sent_total", "Jobs sent to miners", WORKER_LABELS) {
            let _ = JOBS_SENT.set(c);
        }
        if let Ok(c) = register_counter_vec!("vb_shares_accepted_total", "Submissions accepted by the node", WORKER_LABELS) {
            let _ = SHARES_ACCEPTED.set(c);
        }
        if let Ok(c) = register_counter_vec!("vb_shares_rejected_total", "Submissions rejected by the node or the bridge", WORKER_LABELS) {
            let _ = SHARES_REJECTED.set(c);
        }
        if let Ok(c) = register_counter_vec!("vb_disconnects_total", "Miner disconnects", ALGORITHM_LABELS) {
            let _ = DISCONNECTS.set(c);
        }
        if let Ok(c) = register_counter_vec!("vb_worker_errors_total", "Errors reported back to miners by wallet", ERROR_LABELS) {
            let _ = WORKER_ERRORS.set(c);
        }
        if let Ok(g) = register_gauge!("vb_node_synced", "1 when the node reports it is synced") {
            let _ = NODE_SYNCED.set(g);
        }
        if let Ok(g) = register_gauge!("vb_node_sync_progress", "Node verification progress between 0 and 1") {
            let _ = NODE_SYNC_PROGRESS.set(g);
        }
    });
}

fn counter(vec: &OnceLock<CounterVec>, labels: &[&str]) {
    init_metrics();
    if let Some(c) = vec.get() {
        c.with_label_values(labels).inc();
    }
}

fn gauge(g: &OnceLock<Gauge>, value: f64) {
    init_metrics();
    if let Some(g) = g.get() {
        g.set(value);
    }
}

fn algorithm_label(algorithm: Option<Algorithm>) -> &'static str {
    algorithm.map(|a| a.name()).unwrap_or("none")
}

pub fn record_job_minted(algorithm: Algorithm) {
    counter(&JOBS_MINTED, &[algorithm.name()]);
}

pub fn record_job_sent(algorithm: Algorithm, wallet: &str) {
    counter(&JOBS_SENT, &[algorithm.name(), wallet]);
}

pub fn record_share_accepted(algorithm: Algorithm, wallet: &str) {
    counter(&SHARES_ACCEPTED, &[algorithm.name(), wallet]);
}

pub fn record_share_rejected(algorithm: Option<Algorithm>, wallet: &str) {
    counter(&SHARES_REJECTED, &[algorithm_label(algorithm), wallet]);
}

pub fn record_disconnect(algorithm: Option<Algorithm>) {
    counter(&DISCONNECTS, &[algorithm_label(algorithm)]);
}

pub fn record_worker_error(wallet: &str, error: &str) {
    counter(&WORKER_ERRORS, &[wallet, error]);
}

pub fn set_active_sessions(count: usize) {
    gauge(&ACTIVE_SESSIONS, count as f64);
}

pub fn set_live_jobs(count: usize) {
    gauge(&LIVE_JOBS, count as f64);
}

pub fn set_node_sync(synced: bool, progress: f64) {
    gauge(&NODE_SYNCED, if synced { 1.0 } else { 0.0 });
    gauge(&NODE_SYNC_PROGRESS, progress);
}

/// Shared handles the monitor endpoints read from
#[derive(Clone)]
pub struct MonitorState {
    pub registry: Arc<SessionRegistry>,
    pub jobs: Arc<JobManager>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub uptime_secs: i64,
    pub started_at: DateTime<Utc>,
    pub live_jobs: usize,
    pub jobs_by_algorithm: BTreeMap<String, usize>,
    pub sessions: Vec<SessionSummary>,
}

impl MonitorState {
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0),
            started_at: self.started_at,
            live_jobs: self.jobs.live_job_count(),
            jobs_by_algorithm: self.jobs.jobs_by_algorithm(),
            sessions: self.registry.summaries(),
        }
    }
}

async fn handle_http_request<W>(stream: &mut W, request: &str, state: &MonitorState) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    W: AsyncWrite + Unpin,
{
    if request.starts_with("GET /metrics") {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buf)?;

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
            buf.len(),
            String::from_utf8_lossy(&buf)
        );
        stream.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    if request.starts_with("GET /api/status") {
        let json = serde_json::to_string(&state.status()).unwrap_or_else(|_| "{}".to_string());
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\n\r\n{}",
            json.len(),
            json
        );
        stream.write_all(response.as_bytes()).await?;
        return Ok(());
    }

    if request.starts_with("GET /health") {
        stream.write_all(HEALTH_RESPONSE.as_bytes()).await?;
        return Ok(());
    }

    stream.write_all("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".as_bytes()).await?;
    Ok(())
}

const HEALTH_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok";

async fn serve_monitor_connection<S>(mut stream: S, state: MonitorState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = [0; 8192];
    if let Ok(n) = stream.read(&mut buffer).await {
        let request = String::from_utf8_lossy(&buffer[..n]);
        if let Err(e) = handle_http_request(&mut stream, &request, &state).await {
            tracing::debug!("monitor request failed: {}", e);
        }
    }
}

/// Serve `/metrics`, `/api/status` and `/health` until the task is dropped
pub async fn start_monitor_server(port: &str, state: MonitorState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    init_metrics();

    let addr: SocketAddr = bind_addr_from_port(port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("hosting monitor endpoints on {}/metrics and {}/api/status", addr, addr);

    loop {
        let (stream, _) = listener.accept().await?;
        tokio::spawn(serve_monitor_connection(stream, state.clone()));
    }
}

/// Bare liveness listener: every request gets `200 ok`
pub async fn start_health_check_server(port: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = bind_addr_from_port(port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("hosting health check on {}", addr);

    loop {
        let (mut stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buffer = [0; 1024];
            let _ = stream.read(&mut buffer).await;
            let _ = stream.write_all(HEALTH_RESPONSE.as_bytes()).await;
        });
    }
}
