use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use veil_stratum_bridge::log_colors::LogColors;

use crate::app_config::AppConfig;

pub(crate) fn log_file_name(unix_secs: u64) -> String {
    format!("stratum_bridge_{}.log", unix_secs)
}

/// Install the global subscriber. The returned guard flushes the file writer
/// and must be held until the process exits.
pub(crate) fn init_tracing(config: &AppConfig, filter: EnvFilter) -> Option<WorkerGuard> {
    let console = fmt::layer().with_ansi(LogColors::should_colorize()).with_target(false).with_writer(std::io::stderr);

    if !config.log_to_file {
        tracing_subscriber::registry().with(filter).with(console).init();
        return None;
    }

    let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let appender = tracing_appender::rolling::never(".", log_file_name(ts));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer().with_ansi(false).with_target(false).with_writer(writer);

    tracing_subscriber::registry().with(filter).with(console).with(file).init();
    Some(guard)
}
