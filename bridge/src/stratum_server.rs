use crate::algorithm::Algorithm;
use crate::broadcast_scheduler::{BroadcastScheduler, SchedulerConfig};
use crate::constants::SHUTDOWN_DRAIN;
use crate::errors::BridgeError;
use crate::job_manager::JobManager;
use crate::node_api::NodeApi;
use crate::prom::{MonitorState, init_metrics, start_health_check_server, start_monitor_server};
use crate::session_registry::SessionRegistry;
use crate::stratum_dispatcher::{DispatcherConfig, StratumDispatcher};
use crate::stratum_listener::StratumListener;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Runtime settings for one bridge instance
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub stratum_port: String,
    /// Empty disables the monitor endpoints
    pub web_port: String,
    /// Empty disables the bare health listener
    pub health_check_port: String,
    pub print_stats: bool,
    pub job_interval: Duration,
    pub sync_check_interval: Duration,
    pub backend_timeout: Duration,
    pub extranonce_size: u8,
    pub max_jobs_per_algorithm: usize,
    pub algorithms: Vec<Algorithm>,
    pub default_algorithm: Algorithm,
}

/// Shared components of a running bridge
pub struct BridgeServices {
    pub registry: Arc<SessionRegistry>,
    pub jobs: Arc<JobManager>,
    pub dispatcher: Arc<StratumDispatcher>,
    pub scheduler: Arc<BroadcastScheduler>,
}

impl BridgeServices {
    pub fn new(config: &BridgeConfig, node: Arc<dyn NodeApi>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.extranonce_size));
        let jobs = Arc::new(JobManager::new(Arc::clone(&node), config.max_jobs_per_algorithm, config.backend_timeout));
        let dispatcher = Arc::new(StratumDispatcher::new(
            Arc::clone(&node),
            Arc::clone(&jobs),
            Arc::clone(&registry),
            DispatcherConfig {
                algorithms: config.algorithms.clone(),
                default_algorithm: config.default_algorithm,
                backend_timeout: config.backend_timeout,
            },
        ));
        let scheduler = Arc::new(BroadcastScheduler::new(
            node,
            Arc::clone(&jobs),
            Arc::clone(&registry),
            SchedulerConfig {
                job_interval: config.job_interval,
                sync_check_interval: config.sync_check_interval,
                backend_timeout: config.backend_timeout,
                print_stats: config.print_stats,
            },
        ));
        Self { registry, jobs, dispatcher, scheduler }
    }
}

/// Run the bridge until `shutdown_rx` flips to true
pub async fn listen_and_serve_with_shutdown(
    config: BridgeConfig,
    node: Arc<dyn NodeApi>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    init_metrics();
    let services = BridgeServices::new(&config, node);

    if !config.web_port.is_empty() {
        let state = MonitorState {
            registry: Arc::clone(&services.registry),
            jobs: Arc::clone(&services.jobs),
            started_at: Utc::now(),
        };
        let port = config.web_port.clone();
        tokio::spawn(async move {
            if let Err(e) = start_monitor_server(&port, state).await {
                error!("monitor server error: {}", e);
            }
        });
    }

    if !config.health_check_port.is_empty() {
        let port = config.health_check_port.clone();
        tokio::spawn(async move {
            if let Err(e) = start_health_check_server(&port).await {
                error!("health check server error: {}", e);
            }
        });
    }

    // Scheduler loops stop with the listener, whether it ended on shutdown or on error
    let (stop_tx, stop_rx) = watch::channel(false);
    let loops = Arc::clone(&services.scheduler).start(stop_rx);

    let listener = StratumListener::new(Arc::clone(&services.dispatcher), config.stratum_port.clone());
    info!("starting stratum listener on {} ({})", config.stratum_port, algorithm_list(&config.algorithms));
    let result = listener.listen(shutdown_rx).await;

    let _ = stop_tx.send(true);
    for session in services.registry.snapshot() {
        services.registry.remove(session.id());
    }
    let drain = futures_util::future::join_all(loops);
    if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
        warn!("scheduler loops did not stop within {:?}", SHUTDOWN_DRAIN);
    }

    result
}

fn algorithm_list(algorithms: &[Algorithm]) -> String {
    algorithms.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
}
