//! Runtime configuration loaded from `lumen.toml`
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "lumen.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Worker thread count, 0 means one per available core
    #[serde(default)]
    pub workers: usize,

    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_true")]
    pub report_on_shutdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default)]
    pub spans: bool,

    #[serde(default)]
    pub file: Option<String>,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name: default_thread_name(),
        }
    }
}

impl TasksConfig {
    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            report_on_shutdown: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            spans: false,
            file: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_level() -> String { "info".to_string() }
fn default_thread_name() -> String { "lumen-worker".to_string() }

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Find and load `lumen.toml` from the current directory or its parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                match Self::load(&config_path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(path = %config_path.display(), error = %e, "ignoring invalid config"),
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Apply environment overrides (`LUMEN_WORKERS`)
    pub fn apply_env(mut self) -> Self {
        if let Some(workers) = std::env::var("LUMEN_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.tasks.workers = workers;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RuntimeConfig::parse("").unwrap();
        assert_eq!(config.tasks.workers, 0);
        assert_eq!(config.tasks.thread_name, "lumen-worker");
        assert!(config.registry.report_on_shutdown);
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_parse_sections() {
        let config = RuntimeConfig::parse(
            r#"
            [tasks]
            workers = 3
            thread_name = "bg"

            [registry]
            report_on_shutdown = false

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.tasks.workers, 3);
        assert_eq!(config.tasks.worker_count(), 3);
        assert_eq!(config.tasks.thread_name, "bg");
        assert!(!config.registry.report_on_shutdown);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_auto_worker_count_is_positive() {
        assert!(TasksConfig::default().worker_count() >= 1);
    }

    #[test]
    fn test_parse_error() {
        let err = RuntimeConfig::parse("[tasks]\nworkers = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[tasks]\nworkers = 2").unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.tasks.workers, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/lumen.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
