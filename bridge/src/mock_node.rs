use crate::errors::BridgeError;
use crate::node_api::{BlockTemplate, NodeApi, SubmitOutcome, SyncStatus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Scriptable node for tests. Records template fetches and every submit parameter vector.
pub struct MockNode {
    progress: Mutex<f64>,
    template: Mutex<BlockTemplate>,
    template_error: Mutex<Option<BridgeError>>,
    submit_result: Mutex<Result<SubmitOutcome, BridgeError>>,
    submissions: Mutex<Vec<Vec<String>>>,
    template_calls: AtomicUsize,
    sync_calls: AtomicUsize,
    stalled: AtomicBool,
    submit_panics: AtomicBool,
    failing_templates: AtomicUsize,
}

impl MockNode {
    pub fn with_progress(progress: f64) -> Self {
        Self {
            progress: Mutex::new(progress),
            template: Mutex::new(Self::template("00")),
            template_error: Mutex::new(None),
            submit_result: Mutex::new(Ok(SubmitOutcome::Accepted)),
            submissions: Mutex::new(Vec::new()),
            template_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
            stalled: AtomicBool::new(false),
            submit_panics: AtomicBool::new(false),
            failing_templates: AtomicUsize::new(0),
        }
    }

    pub fn synced() -> Self {
        Self::with_progress(1.0)
    }

    pub fn template(prev_hash: &str) -> BlockTemplate {
        BlockTemplate {
            prev_hash: prev_hash.to_string(),
            coinbase_value: 5_000_000_000,
            version: 0x2000_0000,
            bits: "1d00ffff".to_string(),
            cur_time: 1_700_000_000,
            height: 100,
            header_hash: Some("11".repeat(32)),
            mix_hash: Some("22".repeat(32)),
            merkle_root: Some("44".repeat(32)),
            seed_hash: Some("33".repeat(32)),
        }
    }

    pub fn set_progress(&self, progress: f64) {
        *self.progress.lock() = progress;
    }

    pub fn set_template(&self, template: BlockTemplate) {
        *self.template.lock() = template;
    }

    pub fn set_template_error(&self, err: Option<BridgeError>) {
        *self.template_error.lock() = err;
    }

    pub fn set_submit_result(&self, result: Result<SubmitOutcome, BridgeError>) {
        *self.submit_result.lock() = result;
    }

    /// The next `count` template fetches fail with `BackendUnavailable`
    pub fn fail_next_templates(&self, count: usize) {
        self.failing_templates.store(count, Ordering::SeqCst);
    }

    /// Every call hangs forever while stalled
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make `submit_block` panic, to exercise the dispatcher's failure boundary
    pub fn set_submit_panics(&self, panics: bool) {
        self.submit_panics.store(panics, Ordering::SeqCst);
    }

    pub fn template_calls(&self) -> usize {
        self.template_calls.load(Ordering::SeqCst)
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<Vec<String>> {
        self.submissions.lock().clone()
    }

    async fn maybe_stall(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait::async_trait]
impl NodeApi for MockNode {
    async fn get_sync_status(&self) -> Result<SyncStatus, BridgeError> {
        self.maybe_stall().await;
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let progress = *self.progress.lock();
        Ok(SyncStatus::new(1000, 1000, progress, false))
    }

    async fn get_block_template(&self) -> Result<BlockTemplate, BridgeError> {
        self.maybe_stall().await;
        self.template_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_templates.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BridgeError::BackendUnavailable("scripted template failure".to_string()));
        }
        if let Some(err) = self.template_error.lock().clone() {
            return Err(err);
        }
        Ok(self.template.lock().clone())
    }

    async fn submit_block(&self, params: Vec<String>) -> Result<SubmitOutcome, BridgeError> {
        self.maybe_stall().await;
        if self.submit_panics.load(Ordering::SeqCst) {
            panic!("scripted submit panic");
        }
        self.submissions.lock().push(params);
        self.submit_result.lock().clone()
    }
}
