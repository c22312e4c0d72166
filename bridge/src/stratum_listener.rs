use crate::constants::{MAX_LINE_BUFFER, READ_BUFFER_SIZE};
use crate::client_session::ClientSession;
use crate::errors::BridgeError;
use crate::log_colors::LogColors;
use crate::net_utils::bind_addr_from_port;
use crate::prom::record_disconnect;
use crate::stratum_dispatcher::StratumDispatcher;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Why a connection's read side stopped
#[derive(Debug, PartialEq)]
enum ReadEnd {
    Eof,
    Closed,
    Failed(String),
    Rejected(&'static str),
}

/// Stratum TCP listener
pub struct StratumListener {
    dispatcher: Arc<StratumDispatcher>,
    port: String,
}

impl StratumListener {
    pub fn new(dispatcher: Arc<StratumDispatcher>, port: String) -> Self {
        Self { dispatcher, port }
    }

    /// Bind the configured port and accept miners until shutdown is signalled
    pub async fn listen(&self, shutdown_rx: watch::Receiver<bool>) -> Result<(), BridgeError> {
        let addr = bind_addr_from_port(&self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::InternalError(format!("failed listening to socket {}: {}", self.port, e)))?;
        info!("[CONNECTION] stratum listener started on {}", addr);
        self.serve(listener, shutdown_rx).await;
        Ok(())
    }

    pub async fn serve(&self, listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
        if *shutdown_rx.borrow() {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("stopping listening due to server shutdown");
                    break;
                }
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        debug!("[CONNECTION] new client connecting - {}", addr);
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("[CONNECTION] set_nodelay failed for {}: {}", addr, e);
                        }
                        tokio::spawn(serve_connection(Arc::clone(&self.dispatcher), stream, addr.to_string()));
                    }
                    Err(e) => {
                        error!("[CONNECTION] failed to accept incoming connection: {} (kind: {:?})", e, e.kind());
                    }
                }
            }
        }
    }
}

/// Drive one miner connection to completion.
///
/// Three tasks cooperate: this one reads and frames lines, a dispatch worker
/// handles them strictly in arrival order, and a writer drains the session's
/// outbound queue. When reading stops the worker finishes what was queued, then
/// the session leaves the registry and the writer flushes and closes.
pub async fn serve_connection<S>(dispatcher: Arc<StratumDispatcher>, stream: S, remote_addr: String)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let registry = Arc::clone(dispatcher.registry());

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let session = registry.open_session(remote_addr, out_tx);
    info!("[CONNECTION] client connected - {} (session {})", session.remote_addr(), session.id());

    let writer_session = Arc::clone(&session);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                debug!("[BRIDGE->MINER] write to {} failed: {}", writer_session.remote_addr(), e);
                writer_session.disconnect();
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let worker_session = Arc::clone(&session);
    let worker_dispatcher = Arc::clone(&dispatcher);
    let worker_task = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            if !worker_session.connected() {
                break;
            }
            worker_dispatcher.dispatch_line(&worker_session, &line).await;
        }
    });

    let end = read_lines(&mut reader, &session, &line_tx).await;
    drop(line_tx);
    match &end {
        ReadEnd::Eof | ReadEnd::Closed => debug!("[CONNECTION] {} closed connection ({:?})", session.remote_addr(), end),
        ReadEnd::Failed(e) => warn!("[CONNECTION] read error from {}: {}", session.remote_addr(), e),
        ReadEnd::Rejected(reason) => {
            error!("{} rejecting {}: {}", LogColors::error("[CONNECTION]"), session.remote_addr(), reason);
            session.disconnect();
        }
    }

    if let Err(e) = worker_task.await {
        error!("[CONNECTION] dispatch worker for session {} ended abnormally: {}", session.id(), e);
    }

    let algorithm = session.algorithm();
    if registry.remove(session.id()).is_none() {
        // Already dropped by a broadcast; make sure the writer still gets its close
        session.disconnect();
    }
    record_disconnect(algorithm);
    info!("[CONNECTION] client disconnected - {} (session {})", session.remote_addr(), session.id());

    let _ = writer_task.await;
}

async fn read_lines<R>(reader: &mut R, session: &ClientSession, line_tx: &mpsc::UnboundedSender<String>) -> ReadEnd
where
    R: AsyncRead + Unpin,
{
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        if !session.connected() {
            return ReadEnd::Closed;
        }

        let n = match reader.read(&mut buffer).await {
            Ok(0) => return ReadEnd::Eof,
            Ok(n) => n,
            Err(e) => return ReadEnd::Failed(e.to_string()),
        };
        pending.extend(buffer[..n].iter().copied().filter(|&b| b != 0));

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            if is_http_preface(line) {
                return ReadEnd::Rejected("HTTP request on stratum port; only line-delimited JSON-RPC is accepted");
            }
            if line_tx.send(line.to_string()).is_err() {
                return ReadEnd::Closed;
            }
        }

        if pending.len() > MAX_LINE_BUFFER {
            return ReadEnd::Rejected("line exceeds maximum frame size");
        }
    }
}

fn is_http_preface(line: &str) -> bool {
    const PREFIXES: &[&str] = &["PRI * HTTP/2", "GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS "];
    line == "SM" || PREFIXES.iter().any(|p| line.starts_with(p))
}
