//! Logging infrastructure - structured tracing for the object model and task pool
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Named event functions so every subsystem logs the same fields
//! - Console or file output, human-readable or JSON

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

use crate::config::LoggingConfig;
use crate::error::FatalError;

static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // LUMEN_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("LUMEN_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        // LUMEN_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("LUMEN_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("LUMEN_LOG_JSON").is_ok();
        config.show_spans = std::env::var("LUMEN_LOG_SPANS").is_ok();

        config
    }

    /// Build from the `[logging]` section of a runtime config file
    pub fn from_section(section: &LoggingConfig) -> Self {
        Self {
            level: parse_level(&section.level),
            file_output: section.file.is_some(),
            log_path: section.file.clone(),
            json_format: section.json,
            show_spans: section.spans,
        }
    }

    /// Minimal logging
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Verbose logging to `lumen.log`
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("lumen.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging with configuration from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber; `RUST_LOG` takes precedence
/// over `config.level`.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("lumen={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let file = config
            .log_path
            .as_deref()
            .filter(|_| config.file_output)
            .map(file_appender);

        let base = fmt::layer()
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(cfg!(debug_assertions));

        let layer = match (config.json_format, file) {
            (true, Some(appender)) => base.json().with_writer(appender).boxed(),
            (true, None) => base.json().with_writer(io::stderr).boxed(),
            (false, Some(appender)) => base.with_ansi(false).with_writer(appender).boxed(),
            (false, None) => base.with_writer(io::stderr).boxed(),
        };

        // Another subscriber may already be installed (tests, host application)
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    });
}

fn file_appender(path: &str) -> tracing_appender::rolling::RollingFileAppender {
    let path = Path::new(path);
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lumen.log".to_string());
    tracing_appender::rolling::never(directory, file_name)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Object model events
// ============================================================================

#[inline]
pub fn log_object_new(type_name: &str, address: usize) {
    trace!(
        event = "object_new",
        object = type_name,
        address,
        "object created"
    );
}

#[inline]
pub fn log_object_destroy(type_name: &str, address: usize) {
    trace!(
        event = "object_destroy",
        object = type_name,
        address,
        "object destroyed"
    );
}

pub fn log_bridge_attach(type_name: &str, address: usize, peer: usize) {
    debug!(
        event = "bridge_attach",
        object = type_name,
        address,
        peer,
        "object bridged to host wrapper"
    );
}

pub fn log_bridge_installed(host: &str) {
    info!(event = "bridge_installed", host, "host hooks installed");
}

pub fn log_leaks(tag: &str, count: usize) {
    warn!(
        event = "object_leak",
        object = tag,
        count,
        "objects still alive at shutdown"
    );
}

// ============================================================================
// Task pool events
// ============================================================================

pub fn log_pool_start(workers: usize, thread_name: &str) {
    info!(event = "pool_start", workers, thread_name, "task pool started");
}

pub fn log_pool_drained(waited_for: usize, duration_us: u64) {
    debug!(
        event = "pool_drained",
        waited_for,
        duration_us,
        "task pool drained"
    );
}

pub fn log_pool_shutdown(completed: u64, failed: u64) {
    info!(
        event = "pool_shutdown",
        completed,
        failed,
        "task pool shut down"
    );
}

pub fn log_task_failed(task_id: u64, error: &dyn std::fmt::Display) {
    warn!(
        event = "task_failed",
        task_id,
        error = %error,
        "task finished with an error"
    );
}

// ============================================================================
// Runtime events
// ============================================================================

pub fn log_runtime_init(workers: usize, bridged: bool) {
    info!(event = "runtime_init", workers, bridged, "lumen runtime initialized");
}

pub fn log_runtime_shutdown(leaked: usize) {
    info!(event = "runtime_shutdown", leaked, "lumen runtime shut down");
}

pub fn log_fatal(error: &FatalError) {
    error!(event = "fatal", error = %error, "unrecoverable logic error, aborting");
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            debug!(
                operation = self.operation,
                duration_us = self.start.elapsed().as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.file_output);

        let perf_config = LogConfig::performance();
        assert_eq!(perf_config.level, Level::ERROR);

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
        assert_eq!(debug_config.log_path.as_deref(), Some("lumen.log"));
    }

    #[test]
    fn test_from_section() {
        let section = LoggingConfig {
            level: "warn".to_string(),
            json: true,
            spans: false,
            file: Some("out/lumen.log".to_string()),
        };
        let config = LogConfig::from_section(&section);
        assert_eq!(config.level, Level::WARN);
        assert!(config.json_format);
        assert!(config.file_output);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        assert_eq!(parse_level("loud"), Level::INFO);
        assert_eq!(parse_level("TRACE"), Level::TRACE);
    }

    #[test]
    fn test_init_idempotent() {
        init_with_config(LogConfig::performance());
        init_with_config(LogConfig::debug());
        assert!(is_initialized());
    }
}
