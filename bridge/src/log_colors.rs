use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};

/// Console color support for log output.
///
/// The tag helpers return their input unchanged; coloring is decided once at
/// startup and applied by the console layer, never embedded in messages, so
/// file logs stay clean.
pub struct LogColors;

static COLORS_ENABLED: AtomicBool = AtomicBool::new(false);

impl LogColors {
    /// Initialize color support detection
    /// Should be called once at startup
    pub fn init() {
        let no_color = std::env::var_os("NO_COLOR").is_some();
        let is_terminal = io::stderr().is_terminal();
        COLORS_ENABLED.store(!no_color && is_terminal, Ordering::Relaxed);
    }

    /// Check if colors should be used (for tracing-subscriber with_ansi)
    pub fn should_colorize() -> bool {
        COLORS_ENABLED.load(Ordering::Relaxed)
    }

    pub fn miner_to_bridge(s: &str) -> String {
        s.to_string()
    }

    pub fn bridge_to_miner(s: &str) -> String {
        s.to_string()
    }

    pub fn block(s: &str) -> String {
        s.to_string()
    }

    pub fn api(s: &str) -> String {
        s.to_string()
    }

    pub fn error(s: &str) -> String {
        s.to_string()
    }

    pub fn label(s: &str) -> String {
        s.to_string()
    }
}
