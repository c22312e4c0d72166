use crate::algorithm::Algorithm;
use crate::errors::BridgeError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Protocol phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Connected,
    Subscribed,
    Authorized,
}

/// Mutable per-connection state. Only the session's own dispatch worker writes it.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub algorithm: Option<Algorithm>,
    pub difficulty: f64,
    pub extranonce: String,
    pub user_agent: String,
    pub wallet: String,
    pub worker: String,
    pub authorized: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Connected,
            algorithm: None,
            difficulty: 0.0,
            extranonce: String::new(),
            user_agent: String::new(),
            wallet: String::new(),
            worker: String::new(),
            authorized: false,
        }
    }
}

/// Result of binding an algorithm to a session
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub algorithm: Algorithm,
    pub difficulty: f64,
    pub extranonce: String,
    /// False when the session was already bound and the request was ignored
    pub newly_bound: bool,
}

/// Read-only view exposed to monitoring
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: u64,
    pub remote_addr: String,
    pub algorithm: Option<Algorithm>,
    pub wallet: String,
    pub worker: String,
    pub authorized: bool,
    pub connected_at: DateTime<Utc>,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
}

/// One miner connection
pub struct ClientSession {
    id: u64,
    remote_addr: String,
    connected_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected: AtomicBool,
    shares_accepted: AtomicU64,
    shares_rejected: AtomicU64,
}

impl ClientSession {
    pub fn new(id: u64, remote_addr: String, outbound: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            remote_addr,
            connected_at: Utc::now(),
            state: RwLock::new(SessionState::default()),
            outbound: Mutex::new(Some(outbound)),
            connected: AtomicBool::new(true),
            shares_accepted: AtomicU64::new(0),
            shares_rejected: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.state.read().algorithm
    }

    pub fn is_authorized(&self) -> bool {
        self.state.read().authorized
    }

    pub fn wallet(&self) -> String {
        self.state.read().wallet.clone()
    }

    /// Bind `algorithm` unless the session already has one. The extranonce is only
    /// allocated on the first bind, so a repeated subscribe keeps its nonce space.
    pub fn bind_algorithm(&self, algorithm: Algorithm, user_agent: &str, allocate_extranonce: impl FnOnce() -> String) -> Binding {
        let mut state = self.state.write();
        if let Some(bound) = state.algorithm {
            return Binding { algorithm: bound, difficulty: state.difficulty, extranonce: state.extranonce.clone(), newly_bound: false };
        }

        state.algorithm = Some(algorithm);
        state.difficulty = algorithm.difficulty();
        state.extranonce = allocate_extranonce();
        state.user_agent = user_agent.to_string();
        if state.phase == SessionPhase::Connected {
            state.phase = SessionPhase::Subscribed;
        }
        Binding { algorithm, difficulty: state.difficulty, extranonce: state.extranonce.clone(), newly_bound: true }
    }

    /// Record the worker identity. `wallet.worker` usernames are split on the first dot.
    pub fn authorize(&self, username: &str) {
        let (wallet, worker) = match username.split_once('.') {
            Some((wallet, worker)) => (wallet, worker),
            None => (username, ""),
        };
        let mut state = self.state.write();
        state.wallet = wallet.to_string();
        state.worker = worker.to_string();
        state.authorized = true;
        state.phase = SessionPhase::Authorized;
    }

    /// Queue one serialized frame for the writer task
    pub fn send<T: Serialize>(&self, message: &T) -> Result<(), BridgeError> {
        let mut line = serde_json::to_string(message).map_err(|e| BridgeError::InternalError(e.to_string()))?;
        line.push('\n');

        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(BridgeError::SessionClosed);
        };
        if tx.send(line).is_err() {
            drop(guard);
            self.disconnect();
            return Err(BridgeError::SessionClosed);
        }
        Ok(())
    }

    /// Mark the session gone and close the outbound queue; the writer drains and exits
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.outbound.lock().take();
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn record_share(&self, accepted: bool) {
        if accepted {
            self.shares_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shares_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn shares(&self) -> (u64, u64) {
        (self.shares_accepted.load(Ordering::Relaxed), self.shares_rejected.load(Ordering::Relaxed))
    }

    pub fn summary(&self) -> SessionSummary {
        let state = self.state.read();
        let (accepted, rejected) = self.shares();
        SessionSummary {
            id: self.id,
            remote_addr: self.remote_addr.clone(),
            algorithm: state.algorithm,
            wallet: state.wallet.clone(),
            worker: state.worker.clone(),
            authorized: state.authorized,
            connected_at: self.connected_at,
            shares_accepted: accepted,
            shares_rejected: rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Arc<ClientSession>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientSession::new(1, "127.0.0.1:4000".into(), tx), rx)
    }

    #[test]
    fn test_bind_is_sticky() {
        let (s, _rx) = session();
        let first = s.bind_algorithm(Algorithm::Progpow, "progpow-veil", || "00000001".into());
        assert!(first.newly_bound);
        assert_eq!(s.state().phase, SessionPhase::Subscribed);

        let second = s.bind_algorithm(Algorithm::Sha256d, "sha256d", || panic!("must not allocate twice"));
        assert!(!second.newly_bound);
        assert_eq!(second.algorithm, Algorithm::Progpow);
        assert_eq!(second.extranonce, "00000001");
        assert_eq!(s.algorithm(), Some(Algorithm::Progpow));
    }

    #[test]
    fn test_authorize_splits_worker() {
        let (s, _rx) = session();
        s.authorize("VwalletAddr.rig01");
        let state = s.state();
        assert!(state.authorized);
        assert_eq!(state.wallet, "VwalletAddr");
        assert_eq!(state.worker, "rig01");
        assert_eq!(state.phase, SessionPhase::Authorized);
    }

    #[test]
    fn test_send_appends_newline() {
        let (s, mut rx) = session();
        s.send(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "{\"a\":1}\n");
    }

    #[test]
    fn test_send_after_disconnect_fails() {
        let (s, _rx) = session();
        s.disconnect();
        assert!(!s.connected());
        assert_eq!(s.send(&1), Err(BridgeError::SessionClosed));
    }

    #[test]
    fn test_send_after_writer_gone_marks_disconnected() {
        let (s, rx) = session();
        drop(rx);
        assert_eq!(s.send(&1), Err(BridgeError::SessionClosed));
        assert!(!s.connected());
    }

    #[test]
    fn test_summary_counts_shares() {
        let (s, _rx) = session();
        s.record_share(true);
        s.record_share(true);
        s.record_share(false);
        let summary = s.summary();
        assert_eq!(summary.shares_accepted, 2);
        assert_eq!(summary.shares_rejected, 1);
        assert_eq!(summary.remote_addr, "127.0.0.1:4000");
    }
}
