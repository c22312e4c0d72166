use clap::{Parser, builder::BoolishValueParser};
use std::path::PathBuf;
use std::time::Duration;

use crate::app_config::{AppConfig, parse_algorithms};
use veil_stratum_bridge::Algorithm;
use veil_stratum_bridge::net_utils::normalize_port;

pub(crate) fn parse_bool(s: &str) -> Result<bool, anyhow::Error> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" | "enable" | "enabled" => Ok(true),
        "false" | "0" | "no" | "n" | "off" | "disable" | "disabled" => Ok(false),
        _ => Err(anyhow::anyhow!("invalid boolean value: {s}")),
    }
}

/// Split a comma list such as "progpow,sha256d" into algorithms
pub(crate) fn parse_algorithm_list(list: &str) -> Result<Vec<Algorithm>, anyhow::Error> {
    let names: Vec<String> = list.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect();
    if names.is_empty() {
        return Err(anyhow::anyhow!("--algorithms needs at least one entry"));
    }
    parse_algorithms(&names)
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Veil node JSON-RPC endpoint, e.g. "http://127.0.0.1:58812"
    #[arg(long)]
    pub node_address: Option<String>,

    #[arg(long)]
    pub node_user: Option<String>,

    #[arg(long)]
    pub node_password: Option<String>,

    /// Examples: ":3333", "3333", "0.0.0.0:3333"
    #[arg(long)]
    pub stratum_port: Option<String>,

    /// Monitoring server port (metrics, status, health). Empty disables it
    #[arg(long)]
    pub web_port: Option<String>,

    #[arg(long)]
    pub health_check_port: Option<String>,

    #[arg(long, value_parser = BoolishValueParser::new())]
    pub log_to_file: Option<bool>,

    #[arg(long, value_parser = BoolishValueParser::new())]
    pub print_stats: Option<bool>,

    /// Job broadcast interval in milliseconds
    #[arg(long)]
    pub job_interval: Option<u64>,

    /// Node sync check interval in milliseconds
    #[arg(long)]
    pub sync_check_interval: Option<u64>,

    /// Node RPC timeout in milliseconds
    #[arg(long)]
    pub backend_timeout: Option<u64>,

    #[arg(long)]
    pub extranonce_size: Option<u8>,

    #[arg(long)]
    pub max_jobs_per_algorithm: Option<usize>,

    /// Comma separated list, e.g. "progpow,sha256d"
    #[arg(long)]
    pub algorithms: Option<String>,

    #[arg(long)]
    pub default_algorithm: Option<String>,
}

impl Cli {
    pub fn job_interval_duration(&self) -> Option<Duration> {
        self.job_interval.map(Duration::from_millis)
    }

    pub fn sync_check_duration(&self) -> Option<Duration> {
        self.sync_check_interval.map(Duration::from_millis)
    }

    pub fn backend_timeout_duration(&self) -> Option<Duration> {
        self.backend_timeout.map(Duration::from_millis)
    }
}

pub(crate) fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) -> Result<(), anyhow::Error> {
    if let Some(addr) = cli.node_address.as_deref() {
        config.node_address = addr.trim().to_string();
    }
    if let Some(user) = cli.node_user.as_deref() {
        config.node_user = user.to_string();
    }
    if let Some(password) = cli.node_password.as_deref() {
        config.node_password = password.to_string();
    }
    if let Some(port) = cli.stratum_port.as_deref() {
        config.stratum_port = normalize_port(port);
    }
    if let Some(port) = cli.web_port.as_deref() {
        config.web_port = normalize_port(port);
    }
    if let Some(port) = cli.health_check_port.as_deref() {
        config.health_check_port = normalize_port(port);
    }
    if let Some(v) = cli.log_to_file {
        config.log_to_file = v;
    }
    if let Some(v) = cli.print_stats {
        config.print_stats = v;
    }
    if let Some(d) = cli.job_interval_duration() {
        config.job_interval = d;
    }
    if let Some(d) = cli.sync_check_duration() {
        config.sync_check_interval = d;
    }
    if let Some(d) = cli.backend_timeout_duration() {
        config.backend_timeout = d;
    }
    if let Some(v) = cli.extranonce_size {
        config.extranonce_size = v;
    }
    if let Some(v) = cli.max_jobs_per_algorithm {
        config.max_jobs_per_algorithm = v;
    }
    if let Some(list) = cli.algorithms.as_deref() {
        config.algorithms = parse_algorithm_list(list)?;
    }
    if let Some(name) = cli.default_algorithm.as_deref() {
        config.default_algorithm = name.parse().map_err(|e| anyhow::anyhow!("--default-algorithm: {}", e))?;
    }

    config.validate()
}
