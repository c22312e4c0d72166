use crate::algorithm::Algorithm;
use crate::constants::STATS_PRINT_INTERVAL;
use crate::errors::BridgeError;
use crate::job_manager::JobManager;
use crate::node_api::{NodeApi, SyncStatus, call_with_timeout};
use crate::prom::set_node_sync;
use crate::session_registry::SessionRegistry;
use crate::stratum_dispatcher::send_job;
use chrono::Utc;
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub job_interval: Duration,
    pub sync_check_interval: Duration,
    pub backend_timeout: Duration,
    pub print_stats: bool,
}

/// Outcome of one job broadcast tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastReport {
    /// Jobs minted, at most one per algorithm
    pub minted: usize,
    /// Sessions that received a notify
    pub notified: usize,
    /// Sessions removed because their connection was gone
    pub dropped: usize,
    pub failed: Vec<Algorithm>,
}

/// Periodic work: node sync checks, job fan-out and the stats table
pub struct BroadcastScheduler {
    node: Arc<dyn NodeApi>,
    jobs: Arc<JobManager>,
    registry: Arc<SessionRegistry>,
    config: SchedulerConfig,
}

impl BroadcastScheduler {
    pub fn new(node: Arc<dyn NodeApi>, jobs: Arc<JobManager>, registry: Arc<SessionRegistry>, config: SchedulerConfig) -> Self {
        Self { node, jobs, registry, config }
    }

    /// Spawn the sync, job and (optionally) stats loops. They all stop when `shutdown_rx` flips.
    pub fn start(self: Arc<Self>, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = Arc::clone(&self);
        handles.push(tokio::spawn(every(self.config.sync_check_interval, shutdown_rx.clone(), move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                let _ = scheduler.check_sync().await;
            }
        })));

        let scheduler = Arc::clone(&self);
        handles.push(tokio::spawn(every(self.config.job_interval, shutdown_rx.clone(), move || {
            let scheduler = Arc::clone(&scheduler);
            async move {
                let report = scheduler.tick().await;
                if report.minted > 0 || !report.failed.is_empty() {
                    debug!("[SCHEDULER] {:?}", report);
                }
            }
        })));

        if self.config.print_stats {
            let scheduler = Arc::clone(&self);
            handles.push(tokio::spawn(every(STATS_PRINT_INTERVAL, shutdown_rx, move || {
                let scheduler = Arc::clone(&scheduler);
                async move { scheduler.print_stats() }
            })));
        }

        handles
    }

    /// Query the node's sync state and publish it to the gauges
    pub async fn check_sync(&self) -> Result<SyncStatus, BridgeError> {
        match call_with_timeout(self.config.backend_timeout, "getblockchaininfo", self.node.get_sync_status()).await {
            Ok(status) => {
                set_node_sync(status.is_synced, status.progress);
                if status.is_synced {
                    debug!("[NODE] synced at {} blocks", status.blocks);
                } else {
                    warn!(
                        "[NODE] node is not synced: progress {:.2}% ({} / {} headers)",
                        status.progress * 100.0,
                        status.blocks,
                        status.headers
                    );
                }
                Ok(status)
            }
            Err(e) => {
                set_node_sync(false, 0.0);
                warn!("[NODE] sync check failed: {}", e);
                Err(e)
            }
        }
    }

    /// Mint one job per algorithm that has authorized sessions and push it to all of them
    pub async fn tick(&self) -> BroadcastReport {
        let groups = self.registry.authorized_by_algorithm();
        let mut report = BroadcastReport::default();
        if groups.is_empty() {
            return report;
        }

        let minted = join_all(groups.keys().map(|&algorithm| async move { (algorithm, self.jobs.create_job(algorithm).await) })).await;

        for (algorithm, result) in minted {
            let job = match result {
                Ok(job) => job,
                Err(e) => {
                    warn!("[SCHEDULER] skipping {} broadcast: {}", algorithm, e);
                    report.failed.push(algorithm);
                    continue;
                }
            };
            report.minted += 1;

            let Some(sessions) = groups.get(&algorithm) else {
                continue;
            };
            for session in sessions {
                match send_job(session, &job, job.clean_jobs) {
                    Ok(()) => report.notified += 1,
                    Err(e) => {
                        debug!("[SCHEDULER] dropping session {} ({}): {}", session.id(), session.remote_addr(), e);
                        self.registry.remove(session.id());
                        report.dropped += 1;
                    }
                }
            }
            debug!("[JOB] {} sent to {} session(s), clean {}", job.id, sessions.len(), job.clean_jobs);
        }

        report
    }

    pub fn stats_table(&self) -> String {
        let now = Utc::now();
        let mut out = String::new();
        out.push_str("===============================================================================\n");
        out.push_str(&format!("  {:<28} | {:<9} | {:>8} | {:>8} | {:>10}\n", "worker", "algorithm", "accepted", "rejected", "uptime"));
        out.push_str("-------------------------------------------------------------------------------\n");
        for summary in self.registry.summaries() {
            let worker = match (summary.wallet.as_str(), summary.worker.as_str()) {
                ("", _) => summary.remote_addr.clone(),
                (wallet, "") => wallet.to_string(),
                (wallet, worker) => format!("{}.{}", wallet, worker),
            };
            let algorithm = summary.algorithm.map(|a| a.name()).unwrap_or("-");
            out.push_str(&format!(
                "  {:<28} | {:<9} | {:>8} | {:>8} | {:>10}\n",
                truncate(&worker, 28),
                algorithm,
                summary.shares_accepted,
                summary.shares_rejected,
                format_uptime((now - summary.connected_at).num_seconds())
            ));
        }
        out.push_str("-------------------------------------------------------------------------------\n");
        out.push_str(&format!("  sessions: {}  live jobs: {}\n", self.registry.len(), self.jobs.live_job_count()));
        out.push_str("===============================================================================");
        out
    }

    fn print_stats(&self) {
        info!("\n{}", self.stats_table());
    }
}

async fn every<F, Fut>(period: Duration, mut shutdown_rx: watch::Receiver<bool>, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    if *shutdown_rx.borrow() {
        return;
    }
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = interval.tick() => task().await,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { s.to_string() } else { s.chars().take(max - 1).chain(std::iter::once('~')).collect() }
}

fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_session::ClientSession;
    use crate::mock_node::MockNode;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct Harness {
        node: Arc<MockNode>,
        registry: Arc<SessionRegistry>,
        scheduler: Arc<BroadcastScheduler>,
    }

    fn harness() -> Harness {
        let node = Arc::new(MockNode::synced());
        let jobs = Arc::new(JobManager::new(node.clone(), 16, Duration::from_secs(1)));
        let registry = Arc::new(SessionRegistry::new(4));
        let config = SchedulerConfig {
            job_interval: Duration::from_secs(10),
            sync_check_interval: Duration::from_secs(30),
            backend_timeout: Duration::from_secs(1),
            print_stats: false,
        };
        let scheduler = Arc::new(BroadcastScheduler::new(node.clone(), jobs, registry.clone(), config));
        Harness { node, registry, scheduler }
    }

    impl Harness {
        fn miner(&self, algorithm: Algorithm, user: &str) -> (Arc<ClientSession>, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let session = self.registry.open_session("127.0.0.1:9000".into(), tx);
            session.bind_algorithm(algorithm, algorithm.name(), || self.registry.assign_extranonce());
            session.authorize(user);
            (session, rx)
        }
    }

    fn notifies(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            let v: Value = serde_json::from_str(line.trim_end()).unwrap();
            assert_eq!(v["method"], "mining.notify");
            out.push(v);
        }
        out
    }

    #[tokio::test]
    async fn test_one_template_per_algorithm() {
        let h = harness();
        let mut progpow: Vec<_> = (0..3).map(|i| h.miner(Algorithm::Progpow, &format!("Vwallet.p{}", i))).collect();
        let mut sha: Vec<_> = (0..2).map(|i| h.miner(Algorithm::Sha256d, &format!("Vwallet.s{}", i))).collect();

        let report = h.scheduler.tick().await;
        assert_eq!(report, BroadcastReport { minted: 2, notified: 5, dropped: 0, failed: vec![] });
        assert_eq!(h.node.template_calls(), 2);

        let first_progpow = notifies(&mut progpow[0].1);
        for (_, rx) in progpow.iter_mut().skip(1) {
            assert_eq!(notifies(rx), first_progpow, "sessions on one algorithm share the job");
        }
        assert!(first_progpow[0]["params"][0].as_str().unwrap().starts_with("progpow-"));
        for (_, rx) in sha.iter_mut() {
            let jobs = notifies(rx);
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0]["params"].as_array().unwrap().len(), 9);
        }
    }

    #[tokio::test]
    async fn test_unauthorized_sessions_are_skipped() {
        let h = harness();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let idle = h.registry.open_session("127.0.0.1:9001".into(), tx);
        idle.bind_algorithm(Algorithm::Randomx, "randomx", || h.registry.assign_extranonce());

        let report = h.scheduler.tick().await;
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(h.node.template_calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_session_is_removed() {
        let h = harness();
        let (_alive, mut alive_rx) = h.miner(Algorithm::Randomx, "Vwallet.a");
        let (dead, dead_rx) = h.miner(Algorithm::Randomx, "Vwallet.b");
        drop(dead_rx);

        let report = h.scheduler.tick().await;
        assert_eq!(report.notified, 1);
        assert_eq!(report.dropped, 1);
        assert!(h.registry.get(dead.id()).is_none());
        assert_eq!(notifies(&mut alive_rx).len(), 1);

        let report = h.scheduler.tick().await;
        assert_eq!(report.dropped, 0, "removed sessions are never written to again");
    }

    #[tokio::test]
    async fn test_removed_session_is_not_written() {
        let h = harness();
        let (gone, mut gone_rx) = h.miner(Algorithm::Sha256d, "Vwallet.g");
        h.registry.remove(gone.id());

        let report = h.scheduler.tick().await;
        assert_eq!(report.notified, 0);
        assert!(gone_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_algorithm_does_not_block_others() {
        let h = harness();
        let (_p, mut p_rx) = h.miner(Algorithm::Progpow, "Vwallet.p");
        let (_s, mut s_rx) = h.miner(Algorithm::Sha256d, "Vwallet.s");
        let (_r, mut r_rx) = h.miner(Algorithm::Randomx, "Vwallet.r");
        h.node.fail_next_templates(1);

        let report = h.scheduler.tick().await;
        assert_eq!(report.failed, vec![Algorithm::Progpow]);
        assert_eq!(report.minted, 2);
        assert!(notifies(&mut p_rx).is_empty());
        assert_eq!(notifies(&mut s_rx).len(), 1);
        assert_eq!(notifies(&mut r_rx).len(), 1);
        assert_eq!(h.registry.len(), 3, "a backend failure never drops sessions");
    }

    #[tokio::test]
    async fn test_not_synced_skips_every_algorithm() {
        let h = harness();
        let (_p, mut p_rx) = h.miner(Algorithm::Progpow, "Vwallet.p");
        h.node.set_progress(0.4);

        let report = h.scheduler.tick().await;
        assert_eq!(report.failed, vec![Algorithm::Progpow]);
        assert!(notifies(&mut p_rx).is_empty());

        let status = h.scheduler.check_sync().await.unwrap();
        assert!(!status.is_synced);
        assert_eq!(status.progress, 0.4);
    }

    #[tokio::test]
    async fn test_clean_jobs_tracks_prev_hash() {
        let h = harness();
        let (_s, mut rx) = h.miner(Algorithm::Sha256d, "Vwallet");
        h.node.set_template(MockNode::template("aa"));

        h.scheduler.tick().await;
        h.scheduler.tick().await;
        h.node.set_template(MockNode::template("bb"));
        h.scheduler.tick().await;

        let clean: Vec<bool> = notifies(&mut rx).iter().map(|n| n["params"][8].as_bool().unwrap()).collect();
        assert_eq!(clean, vec![true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_node_does_not_hang_tick() {
        let h = harness();
        let (_s, _rx) = h.miner(Algorithm::Randomx, "Vwallet");
        h.node.set_stalled(true);

        let report = h.scheduler.tick().await;
        assert_eq!(report.failed, vec![Algorithm::Randomx]);
        assert!(h.scheduler.check_sync().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_run_until_shutdown() {
        let h = harness();
        let (_s, mut rx) = h.miner(Algorithm::Progpow, "Vwallet");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = Arc::clone(&h.scheduler).start(shutdown_rx);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(h.node.sync_calls() >= 1);
        assert_eq!(notifies(&mut rx).len(), 3, "ticks at 0s, 10s and 20s");

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[test]
    fn test_stats_table_lists_workers() {
        let h = harness();
        let (session, _rx) = h.miner(Algorithm::Sha256d, "Vwallet.rig7");
        session.record_share(true);

        let table = h.scheduler.stats_table();
        assert!(table.contains("Vwallet.rig7"));
        assert!(table.contains("sha256d"));
        assert!(table.contains("sessions: 1"));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(3723), "1h02m03s");
        assert_eq!(format_uptime(-5), "0h00m00s");
    }
}
