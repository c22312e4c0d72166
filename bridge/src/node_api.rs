use crate::constants::SYNC_PROGRESS_THRESHOLD;
use crate::errors::BridgeError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Sync state reported by the node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_synced: bool,
    pub blocks: u64,
    pub headers: u64,
    pub progress: f64,
}

impl SyncStatus {
    pub fn new(blocks: u64, headers: u64, progress: f64, initial_download: bool) -> Self {
        Self { is_synced: progress > SYNC_PROGRESS_THRESHOLD && !initial_download, blocks, headers, progress }
    }
}

/// Block template fields the bridge copies into jobs.
///
/// Everything except the previous hash is optional on the wire; the node only
/// fills the extras belonging to the algorithms it serves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockTemplate {
    #[serde(rename = "previousblockhash")]
    pub prev_hash: String,
    #[serde(rename = "coinbasevalue", default)]
    pub coinbase_value: u64,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub bits: String,
    #[serde(rename = "curtime", default)]
    pub cur_time: u64,
    #[serde(default)]
    pub height: u64,
    #[serde(rename = "pprpcheader", alias = "header_hash", default)]
    pub header_hash: Option<String>,
    #[serde(rename = "pprpcmixhash", alias = "mixhash", default)]
    pub mix_hash: Option<String>,
    #[serde(rename = "merkleroot", default)]
    pub merkle_root: Option<String>,
    #[serde(rename = "seedhash", alias = "rx_seed", default)]
    pub seed_hash: Option<String>,
}

/// Node verdict on a submitted block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected(String),
}

/// Node RPC operations the bridge depends on. Implemented by the HTTP client
/// in production and by a scripted mock in tests.
#[async_trait::async_trait]
pub trait NodeApi: Send + Sync {
    async fn get_sync_status(&self) -> Result<SyncStatus, BridgeError>;

    async fn get_block_template(&self) -> Result<BlockTemplate, BridgeError>;

    /// `params` are already in the algorithm-specific order
    async fn submit_block(&self, params: Vec<String>) -> Result<SubmitOutcome, BridgeError>;
}

/// Bound a backend call. An elapsed timer is a backend failure, never a silent drop.
pub async fn call_with_timeout<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::BackendUnavailable(format!("{} timed out after {:?}", what, timeout))),
    }
}
