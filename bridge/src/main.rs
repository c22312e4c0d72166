use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use veil_stratum_bridge::log_colors::LogColors;
use veil_stratum_bridge::{Auth, NodeApi, NodeRpcClient, listen_and_serve_with_shutdown};

mod app_config;
mod cli;
mod tracing_setup;


use app_config::AppConfig;
use cli::{Cli, apply_cli_overrides};

const CONFIG_FILE_NAME: &str = "config.yaml";
const DEFAULT_LOG_FILTER: &str = "warn,veil_stratum_bridge=info,stratum_bridge=info";

/// Window given to the bridge to close its sessions after Ctrl+C
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Candidate config locations in search order: an explicit `--config` path
/// (which must exist), then the working directory, then the executable directory.
fn config_candidates(requested: Option<&Path>, exe_dir: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = requested {
        return vec![path.to_path_buf()];
    }
    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = exe_dir {
        candidates.push(dir.join(CONFIG_FILE_NAME));
    }
    candidates
}

/// Load the first config file found, or defaults when there is none.
/// Returns the path the config was read from.
fn load_config(requested: Option<&Path>, exe_dir: Option<&Path>) -> Result<(AppConfig, Option<PathBuf>), anyhow::Error> {
    for path in config_candidates(requested, exe_dir) {
        if !path.exists() {
            continue;
        }
        let content = std::fs::read_to_string(&path).with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = AppConfig::from_yaml(&content).with_context(|| format!("failed to parse config file {}", path.display()))?;
        return Ok((config, Some(path)));
    }

    if let Some(path) = requested {
        return Err(anyhow::anyhow!("config file {} does not exist", path.display()));
    }
    Ok((AppConfig::default(), None))
}

fn algorithm_names(config: &AppConfig) -> String {
    config.algorithms.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
}

fn or_disabled(port: &str) -> &str {
    if port.is_empty() { "disabled" } else { port }
}

/// Log the effective configuration at startup
fn log_bridge_configuration(config: &AppConfig, loaded_from: Option<&Path>) {
    tracing::info!("----------------------------------");
    tracing::info!("initializing veil stratum bridge");
    match loaded_from {
        Some(path) => tracing::info!("\tconfig:          {}", path.display()),
        None => tracing::info!("\tconfig:          defaults ({} not found)", CONFIG_FILE_NAME),
    }
    tracing::info!("\tnode:            {}", config.node_address);
    tracing::info!("\tnode auth:       {}", if config.node_user.is_empty() { "none" } else { config.node_user.as_str() });
    tracing::info!("\tstratum:         {}", config.stratum_port);
    tracing::info!("\tweb:             {}", or_disabled(&config.web_port));
    tracing::info!("\thealth check:    {}", or_disabled(&config.health_check_port));
    tracing::info!("\talgorithms:      {}", algorithm_names(config));
    tracing::info!("\tdefault algo:    {}", config.default_algorithm);
    tracing::info!("\tjob interval:    {:?}", config.job_interval);
    tracing::info!("\tsync check:      {:?}", config.sync_check_interval);
    tracing::info!("\tbackend timeout: {:?}", config.backend_timeout);
    tracing::info!("\textranonce:      {} bytes", config.extranonce_size);
    tracing::info!("\tjobs per algo:   {}", config.max_jobs_per_algorithm);
    tracing::info!("\ttemplate rules:  {}", config.template_rules.join(","));
    tracing::info!("\tprint stats:     {}", config.print_stats);
    tracing::info!("\tlog to file:     {}", config.log_to_file);
    tracing::info!("----------------------------------");
}

fn node_auth(config: &AppConfig) -> Option<Auth> {
    if config.node_user.is_empty() && config.node_password.is_empty() {
        None
    } else {
        Some(Auth::new(config.node_user.clone(), config.node_password.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let exe_dir = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf));
    let (mut config, loaded_from) = load_config(cli.config.as_deref(), exe_dir.as_deref())?;
    apply_cli_overrides(&mut config, &cli)?;

    // Initialize color support detection
    LogColors::init();

    // Warn by default, info from the bridge itself. RUST_LOG overrides.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // Keeps the file writer flushing until exit
    static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
    if let Some(guard) = tracing_setup::init_tracing(&config, filter) {
        let _ = FILE_GUARD.set(guard);
    }

    if loaded_from.is_none() {
        tracing::warn!("{} not found, using defaults (cwd: {:?})", CONFIG_FILE_NAME, std::env::current_dir().ok());
    }
    log_bridge_configuration(&config, loaded_from.as_deref());

    let client = NodeRpcClient::new(&config.node_address, node_auth(&config), config.template_rules.clone())
        .map_err(|e| anyhow::anyhow!("failed to create node RPC client: {}", e))?;
    let node: Arc<dyn NodeApi> = Arc::new(client);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bridge_fut = listen_and_serve_with_shutdown(config.bridge_config(), node, shutdown_rx);
    tokio::pin!(bridge_fut);

    tokio::select! {
        res = &mut bridge_fut => {
            res.map_err(|e| anyhow::anyhow!("bridge server error: {}", e))
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, starting shutdown");
            let _ = shutdown_tx.send(true);
            tokio::select! {
                res = tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut bridge_fut) => {
                    match res {
                        Ok(res) => res.map_err(|e| anyhow::anyhow!("bridge server error: {}", e)),
                        Err(_) => {
                            tracing::warn!("Timed out waiting for sessions to close; exiting");
                            Ok(())
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Second Ctrl+C received, forcing exit");
                    std::process::exit(130);
                }
            }
        }
    }
}
