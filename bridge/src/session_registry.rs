use crate::algorithm::Algorithm;
use crate::client_session::{ClientSession, SessionSummary};
use crate::prom::set_active_sessions;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Live sessions plus the id and extranonce counters shared by all connections
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Arc<ClientSession>>>,
    next_id: AtomicU64,
    next_extranonce: AtomicU64,
    extranonce_size: u8,
    max_extranonce: u64,
}

impl SessionRegistry {
    pub fn new(extranonce_size: u8) -> Self {
        let extranonce_size = extranonce_size.clamp(1, 8);
        let max_extranonce = if extranonce_size >= 8 { u64::MAX } else { (1u64 << (8 * extranonce_size as u32)) - 1 };
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            next_extranonce: AtomicU64::new(0),
            extranonce_size,
            max_extranonce,
        }
    }

    pub fn extranonce_size(&self) -> u8 {
        self.extranonce_size
    }

    /// Create and register a session for a fresh connection
    pub fn open_session(&self, remote_addr: String, outbound: mpsc::UnboundedSender<String>) -> Arc<ClientSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = ClientSession::new(id, remote_addr, outbound);
        self.add(Arc::clone(&session));
        session
    }

    pub fn add(&self, session: Arc<ClientSession>) {
        let count = {
            let mut sessions = self.sessions.write();
            sessions.insert(session.id(), session);
            sessions.len()
        };
        set_active_sessions(count);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<ClientSession>> {
        let (removed, count) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(&id);
            (removed, sessions.len())
        };
        if let Some(session) = &removed {
            session.disconnect();
        }
        set_active_sessions(count);
        removed
    }

    pub fn get(&self, id: u64) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Copy of the live set, taken under a short read lock
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Authorized, bound and still connected sessions grouped by algorithm
    pub fn authorized_by_algorithm(&self) -> BTreeMap<Algorithm, Vec<Arc<ClientSession>>> {
        let mut grouped: BTreeMap<Algorithm, Vec<Arc<ClientSession>>> = BTreeMap::new();
        for session in self.snapshot() {
            if !session.connected() {
                continue;
            }
            let state = session.state();
            if let (true, Some(algorithm)) = (state.authorized, state.algorithm) {
                grouped.entry(algorithm).or_default().push(session);
            }
        }
        grouped
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self.snapshot().iter().map(|s| s.summary()).collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// Next extranonce as fixed-width lowercase hex, wrapping at the size limit
    pub fn assign_extranonce(&self) -> String {
        let max = self.max_extranonce;
        let previous = self
            .next_extranonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |val| if val < max { Some(val + 1) } else { Some(0) })
            .unwrap_or(0);
        if previous == max {
            warn!("wrapped extranonce! new clients may be duplicating work...");
        }
        format!("{:0width$x}", previous, width = self.extranonce_size as usize * 2)
    }
}
