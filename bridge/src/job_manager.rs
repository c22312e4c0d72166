use crate::algorithm::Algorithm;
use crate::errors::BridgeError;
use crate::node_api::{BlockTemplate, NodeApi, call_with_timeout};
use crate::prom::{record_job_minted, set_live_jobs};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Algorithm-specific part of a job
#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmExtras {
    Progpow { header_hash: String, mix_hash: String },
    Sha256d { merkle_root: String },
    Randomx { seed_hash: String },
}

impl AlgorithmExtras {
    fn from_template(algorithm: Algorithm, template: &BlockTemplate) -> Self {
        let field = |v: &Option<String>| v.clone().unwrap_or_default();
        match algorithm {
            Algorithm::Progpow => {
                AlgorithmExtras::Progpow { header_hash: field(&template.header_hash), mix_hash: field(&template.mix_hash) }
            }
            Algorithm::Sha256d => AlgorithmExtras::Sha256d { merkle_root: field(&template.merkle_root) },
            Algorithm::Randomx => AlgorithmExtras::Randomx { seed_hash: field(&template.seed_hash) },
        }
    }
}

/// Immutable mining job built from one block template
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub algorithm: Algorithm,
    pub prev_hash: String,
    pub coinbase_value: u64,
    pub version: u32,
    pub bits: String,
    pub cur_time: u64,
    pub height: u64,
    pub difficulty: f64,
    pub extras: AlgorithmExtras,
    /// Previous hash changed since the last job on this algorithm
    pub clean_jobs: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Arc<Job>>,
    order: HashMap<Algorithm, VecDeque<String>>,
    last_prev_hash: HashMap<Algorithm, String>,
}

/// Mints jobs from node templates and keeps the most recent ones per algorithm
pub struct JobManager {
    node: Arc<dyn NodeApi>,
    counter: AtomicU64,
    table: Mutex<JobTable>,
    max_jobs_per_algorithm: usize,
    backend_timeout: Duration,
}

impl JobManager {
    pub fn new(node: Arc<dyn NodeApi>, max_jobs_per_algorithm: usize, backend_timeout: Duration) -> Self {
        Self {
            node,
            counter: AtomicU64::new(0),
            table: Mutex::new(JobTable::default()),
            max_jobs_per_algorithm: max_jobs_per_algorithm.max(1),
            backend_timeout,
        }
    }

    /// Confirm the node is synced, fetch a fresh template and register a new job for `algorithm`
    pub async fn create_job(&self, algorithm: Algorithm) -> Result<Arc<Job>, BridgeError> {
        let status = call_with_timeout(self.backend_timeout, "getblockchaininfo", self.node.get_sync_status()).await?;
        if !status.is_synced {
            tracing::debug!("[JOB] refusing to mint {} job, node progress {:.4}", algorithm, status.progress);
            return Err(BridgeError::NotSynced(status.progress));
        }

        let template = call_with_timeout(self.backend_timeout, "getblocktemplate", self.node.get_block_template()).await?;
        Ok(self.create_job_from_template(algorithm, &template))
    }

    /// Register a job built from an already fetched template
    pub fn create_job_from_template(&self, algorithm: Algorithm, template: &BlockTemplate) -> Arc<Job> {
        let (job, live) = {
            let mut table = self.table.lock();

            // Id allocation happens under the table lock so table order matches id order
            let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let clean_jobs = table.last_prev_hash.get(&algorithm).is_none_or(|prev| *prev != template.prev_hash);

            let job = Arc::new(Job {
                id: format!("{}-{}", algorithm, counter),
                algorithm,
                prev_hash: template.prev_hash.clone(),
                coinbase_value: template.coinbase_value,
                version: template.version,
                bits: template.bits.clone(),
                cur_time: template.cur_time,
                height: template.height,
                difficulty: algorithm.difficulty(),
                extras: AlgorithmExtras::from_template(algorithm, template),
                clean_jobs,
                created_at: Utc::now(),
            });

            table.last_prev_hash.insert(algorithm, template.prev_hash.clone());
            table.jobs.insert(job.id.clone(), Arc::clone(&job));

            let mut evicted = Vec::new();
            let order = table.order.entry(algorithm).or_default();
            order.push_back(job.id.clone());
            while order.len() > self.max_jobs_per_algorithm {
                if let Some(old) = order.pop_front() {
                    evicted.push(old);
                }
            }
            for id in evicted {
                table.jobs.remove(&id);
            }

            (job, table.jobs.len())
        };

        record_job_minted(algorithm);
        set_live_jobs(live);
        tracing::debug!("[JOB] created job {} (height {}, clean {}, live jobs {})", job.id, job.height, job.clean_jobs, live);
        job
    }

    pub fn get_job(&self, id: &str) -> Option<Arc<Job>> {
        self.table.lock().jobs.get(id).cloned()
    }

    /// Newest live job for `algorithm`, if any
    pub fn latest_job(&self, algorithm: Algorithm) -> Option<Arc<Job>> {
        let table = self.table.lock();
        table.order.get(&algorithm).and_then(|ids| ids.back()).and_then(|id| table.jobs.get(id)).cloned()
    }

    pub fn live_job_count(&self) -> usize {
        self.table.lock().jobs.len()
    }

    pub fn jobs_by_algorithm(&self) -> BTreeMap<String, usize> {
        self.table.lock().order.iter().map(|(algo, ids)| (algo.to_string(), ids.len())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_node::MockNode;
    use std::collections::HashSet;

    fn manager(node: Arc<MockNode>, max: usize) -> JobManager {
        JobManager::new(node, max, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_create_job_for_every_algorithm() {
        let node = Arc::new(MockNode::synced());
        let jobs = manager(Arc::clone(&node), 16);

        let mut last = 0;
        for algorithm in Algorithm::ALL {
            let job = jobs.create_job(algorithm).await.unwrap();
            assert_eq!(job.algorithm, algorithm);
            assert!(job.id.starts_with(&format!("{}-", algorithm)));
            let counter: u64 = job.id.rsplit('-').next().unwrap().parse().unwrap();
            assert!(counter > last, "counter must increase: {} after {}", counter, last);
            assert_eq!(job.difficulty, algorithm.difficulty());
            last = counter;
        }
        assert_eq!(jobs.live_job_count(), 3);
        assert_eq!(node.template_calls(), 3);
    }

    #[tokio::test]
    async fn test_not_synced_registers_nothing() {
        let node = Arc::new(MockNode::with_progress(0.5));
        let jobs = manager(Arc::clone(&node), 16);

        let err = jobs.create_job(Algorithm::Progpow).await.unwrap_err();
        assert_eq!(err, BridgeError::NotSynced(0.5));
        assert_eq!(jobs.live_job_count(), 0);
        assert_eq!(node.template_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_are_unique() {
        let node = Arc::new(MockNode::synced());
        let jobs = Arc::new(manager(node, 1000));

        let mut handles = Vec::new();
        for i in 0..64 {
            let jobs = Arc::clone(&jobs);
            let algorithm = Algorithm::ALL[i % 3];
            handles.push(tokio::spawn(async move { jobs.create_job(algorithm).await.unwrap().id.clone() }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()), "duplicate job id");
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(jobs.live_job_count(), 64);
    }

    #[test]
    fn test_eviction_keeps_most_recent_per_algorithm() {
        let jobs = manager(Arc::new(MockNode::synced()), 2);
        let template = MockNode::template("aa");

        let first = jobs.create_job_from_template(Algorithm::Progpow, &template);
        let second = jobs.create_job_from_template(Algorithm::Progpow, &template);
        let other = jobs.create_job_from_template(Algorithm::Sha256d, &template);
        let third = jobs.create_job_from_template(Algorithm::Progpow, &template);

        assert!(jobs.get_job(&first.id).is_none(), "oldest progpow job should be evicted");
        assert!(jobs.get_job(&second.id).is_some());
        assert!(jobs.get_job(&third.id).is_some());
        assert!(jobs.get_job(&other.id).is_some(), "eviction is per algorithm");
        assert_eq!(jobs.live_job_count(), 3);
        assert_eq!(jobs.jobs_by_algorithm().get("progpow"), Some(&2));
    }

    #[test]
    fn test_latest_job_per_algorithm() {
        let jobs = manager(Arc::new(MockNode::synced()), 2);
        assert!(jobs.latest_job(Algorithm::Progpow).is_none());

        let template = MockNode::template("aa");
        jobs.create_job_from_template(Algorithm::Progpow, &template);
        let newest = jobs.create_job_from_template(Algorithm::Progpow, &template);
        let sha = jobs.create_job_from_template(Algorithm::Sha256d, &template);

        assert_eq!(jobs.latest_job(Algorithm::Progpow).unwrap().id, newest.id);
        assert_eq!(jobs.latest_job(Algorithm::Sha256d).unwrap().id, sha.id);
        assert!(jobs.latest_job(Algorithm::Randomx).is_none());
    }

    #[test]
    fn test_clean_jobs_follows_prev_hash() {
        let jobs = manager(Arc::new(MockNode::synced()), 8);

        assert!(jobs.create_job_from_template(Algorithm::Randomx, &MockNode::template("aa")).clean_jobs);
        assert!(!jobs.create_job_from_template(Algorithm::Randomx, &MockNode::template("aa")).clean_jobs);
        assert!(jobs.create_job_from_template(Algorithm::Progpow, &MockNode::template("aa")).clean_jobs);
        assert!(jobs.create_job_from_template(Algorithm::Randomx, &MockNode::template("bb")).clean_jobs);
    }

    #[test]
    fn test_jobs_are_never_mutated() {
        let jobs = manager(Arc::new(MockNode::synced()), 8);
        let first = jobs.create_job_from_template(Algorithm::Sha256d, &MockNode::template("aa"));
        let snapshot = (*first).clone();
        let second = jobs.create_job_from_template(Algorithm::Sha256d, &MockNode::template("bb"));

        assert_ne!(first.id, second.id);
        assert_eq!(*jobs.get_job(&first.id).unwrap(), snapshot);
    }

    #[test]
    fn test_extras_per_algorithm() {
        let jobs = manager(Arc::new(MockNode::synced()), 8);
        let template = MockNode::template("aa");

        match &jobs.create_job_from_template(Algorithm::Progpow, &template).extras {
            AlgorithmExtras::Progpow { header_hash, .. } => assert_eq!(header_hash, "11".repeat(32).as_str()),
            other => panic!("unexpected extras {:?}", other),
        }
        match &jobs.create_job_from_template(Algorithm::Randomx, &template).extras {
            AlgorithmExtras::Randomx { seed_hash } => assert_eq!(seed_hash, "33".repeat(32).as_str()),
            other => panic!("unexpected extras {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_node_times_out() {
        let node = Arc::new(MockNode::synced());
        node.set_stalled(true);
        let jobs = manager(node, 8);

        let err = jobs.create_job(Algorithm::Progpow).await.unwrap_err();
        assert!(matches!(err, BridgeError::BackendUnavailable(_)), "got {:?}", err);
        assert_eq!(jobs.live_job_count(), 0);
    }
}
