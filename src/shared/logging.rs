use chrono::Local;
use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Level from a user supplied name; unknown names mean `Info`.
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "trace" | "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warning,
            _ => LogLevel::Error,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Lowest level the status helpers print. Set once from `-v`/`-q` or
/// `AZINFRA_LOG_LEVEL`.
pub fn set_level(level: LogLevel) {
    THRESHOLD.store(level as u8, Ordering::Relaxed);
}

pub fn level() -> LogLevel {
    LogLevel::from_u8(THRESHOLD.load(Ordering::Relaxed))
}

pub fn enabled(level: LogLevel) -> bool {
    level >= self::level()
}

/// Map a user supplied level name to an `EnvFilter` directive.
pub fn filter_directive(level: &str) -> String {
    let level = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    };
    format!("azinfra={}", level)
}

/// Log a message to stderr with timestamp and log level
pub fn log(level: LogLevel, message: &str) {
    if !enabled(level) {
        return;
    }
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    eprintln!("[{}] [{}] {}", timestamp, level, message);
}

pub fn debug(message: &str) {
    log(LogLevel::Debug, message);
}

pub fn info(message: &str) {
    log(LogLevel::Info, message);
}

pub fn warn(message: &str) {
    log(LogLevel::Warning, message);
}

pub fn error(message: &str) {
    log(LogLevel::Error, message);
}

/// Announce a numbered pipeline step, e.g. `==> [3/10] Preparing state backend`.
pub fn step(index: usize, total: usize, message: &str) {
    if enabled(LogLevel::Info) {
        eprintln!("==> [{}/{}] {}", index, total, message);
    }
}

pub fn success(message: &str) {
    if enabled(LogLevel::Info) {
        eprintln!("✓ {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive("DEBUG"), "azinfra=debug");
        assert_eq!(filter_directive("warning"), "azinfra=warn");
        assert_eq!(filter_directive("nonsense"), "azinfra=info");
    }

    #[test]
    fn test_quiet_level_hides_status_lines() {
        // -q resolves to "error" for both the tracing filter and the helpers
        assert_eq!(filter_directive("error"), "azinfra=error");
        assert_eq!(LogLevel::from_name("error"), LogLevel::Error);

        set_level(LogLevel::from_name("error"));
        assert!(!enabled(LogLevel::Info));
        assert!(!enabled(LogLevel::Warning));
        assert!(enabled(LogLevel::Error));

        set_level(LogLevel::from_name("info"));
        assert!(!enabled(LogLevel::Debug));
        assert!(enabled(LogLevel::Info));

        set_level(LogLevel::from_name("trace"));
        assert!(enabled(LogLevel::Debug));
        set_level(LogLevel::Info);
    }
}
