use std::time::Duration;

use crate::cli::parse_bool;

use veil_stratum_bridge::Algorithm;
use veil_stratum_bridge::BridgeConfig;
use veil_stratum_bridge::constants::{
    DEFAULT_BACKEND_TIMEOUT, DEFAULT_EXTRANONCE_SIZE, DEFAULT_JOB_INTERVAL, DEFAULT_MAX_JOBS_PER_ALGORITHM,
    DEFAULT_SYNC_CHECK_INTERVAL, MAX_EXTRANONCE_SIZE,
};
use veil_stratum_bridge::net_utils::normalize_port;
use yaml_rust::{Yaml, YamlLoader};

/// Effective bridge settings after the YAML file and CLI overrides are merged
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppConfig {
    pub(crate) node_address: String,
    pub(crate) node_user: String,
    pub(crate) node_password: String,
    pub(crate) stratum_port: String,
    pub(crate) web_port: String,
    pub(crate) health_check_port: String,
    pub(crate) log_to_file: bool,
    pub(crate) print_stats: bool,
    pub(crate) job_interval: Duration,
    pub(crate) sync_check_interval: Duration,
    pub(crate) backend_timeout: Duration,
    pub(crate) extranonce_size: u8,
    pub(crate) max_jobs_per_algorithm: usize,
    pub(crate) algorithms: Vec<Algorithm>,
    pub(crate) default_algorithm: Algorithm,
    pub(crate) template_rules: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_address: "http://127.0.0.1:58812".to_string(),
            node_user: String::new(),
            node_password: String::new(),
            stratum_port: ":3333".to_string(),
            web_port: String::new(),
            health_check_port: String::new(),
            log_to_file: false,
            print_stats: true,
            job_interval: DEFAULT_JOB_INTERVAL,
            sync_check_interval: DEFAULT_SYNC_CHECK_INTERVAL,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            extranonce_size: DEFAULT_EXTRANONCE_SIZE,
            max_jobs_per_algorithm: DEFAULT_MAX_JOBS_PER_ALGORITHM,
            algorithms: Algorithm::ALL.to_vec(),
            default_algorithm: Algorithm::Progpow,
            template_rules: vec!["segwit".to_string()],
        }
    }
}

fn millis(doc: &Yaml, key: &str) -> Result<Option<Duration>, anyhow::Error> {
    match &doc[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(ms) if *ms > 0 => Ok(Some(Duration::from_millis(*ms as u64))),
        Yaml::Real(_) => match doc[key].as_f64() {
            Some(ms) if ms > 0.0 => Ok(Some(Duration::from_millis(ms as u64))),
            _ => Err(anyhow::anyhow!("'{}' must be a positive number of milliseconds", key)),
        },
        _ => Err(anyhow::anyhow!("'{}' must be a positive number of milliseconds", key)),
    }
}

// Accepts YAML booleans as well as the strings parse_bool understands ("enabled", "off", ...)
fn flag(doc: &Yaml, key: &str) -> Result<Option<bool>, anyhow::Error> {
    match &doc[key] {
        Yaml::Boolean(b) => Ok(Some(*b)),
        Yaml::String(s) => parse_bool(s).map(Some).map_err(|e| anyhow::anyhow!("'{}': {}", key, e)),
        Yaml::Integer(i) => parse_bool(&i.to_string()).map(Some).map_err(|e| anyhow::anyhow!("'{}': {}", key, e)),
        Yaml::BadValue | Yaml::Null => Ok(None),
        _ => Err(anyhow::anyhow!("'{}' must be a boolean", key)),
    }
}

fn integer(doc: &Yaml, key: &str) -> Result<Option<i64>, anyhow::Error> {
    match &doc[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(i) => Ok(Some(*i)),
        _ => Err(anyhow::anyhow!("'{}' must be an integer", key)),
    }
}

fn text<'a>(doc: &'a Yaml, key: &str) -> Result<Option<&'a str>, anyhow::Error> {
    match &doc[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::String(s) => Ok(Some(s.as_str())),
        _ => Err(anyhow::anyhow!("'{}' must be a string", key)),
    }
}

fn string_list(doc: &Yaml, key: &str) -> Result<Option<Vec<String>>, anyhow::Error> {
    match &doc[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| anyhow::anyhow!("'{}' entries must be strings", key)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Yaml::String(s) => Ok(Some(s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())),
        _ => Err(anyhow::anyhow!("'{}' must be a list", key)),
    }
}

/// Parse a list of algorithm names, rejecting unknown ones
pub(crate) fn parse_algorithms(names: &[String]) -> Result<Vec<Algorithm>, anyhow::Error> {
    let mut algorithms = Vec::with_capacity(names.len());
    for name in names {
        let algorithm: Algorithm = name.parse().map_err(|e| anyhow::anyhow!("{}", e))?;
        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }
    Ok(algorithms)
}

impl AppConfig {
    pub(crate) fn from_yaml(content: &str) -> Result<Self, anyhow::Error> {
        let docs = YamlLoader::load_from_str(content)?;
        let mut config = AppConfig::default();
        let Some(doc) = docs.first() else {
            // An empty file means all defaults
            return Ok(config);
        };

        if let Some(addr) = doc["node_address"].as_str() {
            config.node_address = addr.to_string();
        }

        if let Some(user) = doc["node_user"].as_str() {
            config.node_user = user.to_string();
        }

        if let Some(password) = doc["node_password"].as_str() {
            config.node_password = password.to_string();
        }

        // Ports may be written as strings (":3333") or bare numbers (3333)
        let port = |key: &str| -> Option<String> {
            doc[key].as_str().map(normalize_port).or_else(|| doc[key].as_i64().map(|p| normalize_port(&p.to_string())))
        };
        if let Some(p) = port("stratum_port") {
            config.stratum_port = p;
        }
        if let Some(p) = port("web_port") {
            config.web_port = p;
        }
        if let Some(p) = port("health_check_port") {
            config.health_check_port = p;
        }

        if let Some(log) = flag(doc, "log_to_file")? {
            config.log_to_file = log;
        }

        if let Some(stats) = flag(doc, "print_stats")? {
            config.print_stats = stats;
        }

        if let Some(d) = millis(doc, "job_interval")? {
            config.job_interval = d;
        }
        if let Some(d) = millis(doc, "sync_check_interval")? {
            config.sync_check_interval = d;
        }
        if let Some(d) = millis(doc, "backend_timeout")? {
            config.backend_timeout = d;
        }

        if let Some(size) = integer(doc, "extranonce_size")? {
            config.extranonce_size =
                u8::try_from(size).map_err(|_| anyhow::anyhow!("extranonce_size out of range: {}", size))?;
        }

        if let Some(max) = integer(doc, "max_jobs_per_algorithm")? {
            config.max_jobs_per_algorithm =
                usize::try_from(max).map_err(|_| anyhow::anyhow!("max_jobs_per_algorithm out of range: {}", max))?;
        }

        if let Some(names) = string_list(doc, "algorithms")? {
            config.algorithms = parse_algorithms(&names)?;
        }

        if let Some(name) = text(doc, "default_algorithm")? {
            config.default_algorithm = name.parse().map_err(|e| anyhow::anyhow!("default_algorithm: {}", e))?;
        }

        if let Some(rules) = string_list(doc, "template_rules")? {
            config.template_rules = rules;
        }

        Ok(config)
    }

    /// Reject combinations the bridge cannot run with
    pub(crate) fn validate(&self) -> Result<(), anyhow::Error> {
        if self.node_address.trim().is_empty() {
            return Err(anyhow::anyhow!("node_address must not be empty"));
        }
        if self.stratum_port.is_empty() {
            return Err(anyhow::anyhow!("stratum_port must not be empty"));
        }
        if !(1..=MAX_EXTRANONCE_SIZE).contains(&self.extranonce_size) {
            return Err(anyhow::anyhow!("extranonce_size must be between 1 and {}, got {}", MAX_EXTRANONCE_SIZE, self.extranonce_size));
        }
        if self.max_jobs_per_algorithm == 0 {
            return Err(anyhow::anyhow!("max_jobs_per_algorithm must be at least 1"));
        }
        if self.algorithms.is_empty() {
            return Err(anyhow::anyhow!("at least one algorithm must be enabled"));
        }
        if !self.algorithms.contains(&self.default_algorithm) {
            return Err(anyhow::anyhow!("default_algorithm '{}' is not in the enabled algorithms", self.default_algorithm));
        }
        for (name, d) in [
            ("job_interval", self.job_interval),
            ("sync_check_interval", self.sync_check_interval),
            ("backend_timeout", self.backend_timeout),
        ] {
            if d.is_zero() {
                return Err(anyhow::anyhow!("{} must be greater than zero", name));
            }
        }
        if !self.web_port.is_empty() && self.web_port == self.stratum_port {
            return Err(anyhow::anyhow!("web_port and stratum_port must differ ({})", self.web_port));
        }
        Ok(())
    }

    pub(crate) fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            stratum_port: self.stratum_port.clone(),
            web_port: self.web_port.clone(),
            health_check_port: self.health_check_port.clone(),
            print_stats: self.print_stats,
            job_interval: self.job_interval,
            sync_check_interval: self.sync_check_interval,
            backend_timeout: self.backend_timeout,
            extranonce_size: self.extranonce_size,
            max_jobs_per_algorithm: self.max_jobs_per_algorithm,
            algorithms: self.algorithms.clone(),
            default_algorithm: self.default_algorithm,
        }
    }
}
