//! Configuration management
//!
//! Runner settings come from the process environment; every value has a
//! default so an empty environment yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base directory for per-invocation workspaces
pub const ENV_WORKSPACE_ROOT: &str = "CIRUNNER_WORKSPACE_ROOT";
/// Shell used for scripts
pub const ENV_SHELL: &str = "CIRUNNER_SHELL";
/// Fallback log level when `RUST_LOG` is unset
pub const ENV_LOG_LEVEL: &str = "CIRUNNER_LOG_LEVEL";
/// Plugin results file read after pre-CI
pub const ENV_RESULTS_FILE: &str = "CIRUNNER_RESULTS_FILE";
/// Image scanner base URL
pub const ENV_SCANNER_ENDPOINT: &str = "IMAGE_SCANNER_ENDPOINT";
/// Completion event URL
pub const ENV_EVENT_ENDPOINT: &str = "CIRUNNER_EVENT_ENDPOINT";
/// Root directory of the local blob store
pub const ENV_BLOB_ROOT: &str = "CIRUNNER_BLOB_ROOT";
/// Seconds to wait for the container daemon
pub const ENV_DOCKER_START_WAIT: &str = "CIRUNNER_DOCKER_START_WAIT_SECS";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base directory for per-invocation workspaces
    pub workspace_root: PathBuf,
    /// Shell used for scripts
    pub shell: String,
    /// Log level
    pub log_level: String,
    /// Plugin results file
    pub results_file: PathBuf,
    /// Image scanner base URL
    pub scanner_endpoint: String,
    /// Completion event URL
    pub event_endpoint: String,
    /// Root directory of the local blob store
    pub blob_root: PathBuf,
    /// Seconds to wait for the container daemon
    pub docker_start_wait_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("cirunner"),
            shell: "sh".to_string(),
            log_level: "info".to_string(),
            results_file: PathBuf::from("/polling-plugin/results.json"),
            scanner_endpoint: "http://image-scanner-service:80".to_string(),
            event_endpoint: "http://localhost:8080/events".to_string(),
            blob_root: std::env::temp_dir().join("cirunner-blobs"),
            docker_start_wait_secs: 150,
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, falling back to defaults
    ///
    /// Empty values count as unset. An unparsable wait time keeps the
    /// default and logs a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let docker_start_wait_secs = match get(ENV_DOCKER_START_WAIT) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Invalid docker start wait, using default");
                defaults.docker_start_wait_secs
            }),
            None => defaults.docker_start_wait_secs,
        };

        Self {
            workspace_root: get(ENV_WORKSPACE_ROOT).map_or(defaults.workspace_root, PathBuf::from),
            shell: get(ENV_SHELL).unwrap_or(defaults.shell),
            log_level: get(ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            results_file: get(ENV_RESULTS_FILE).map_or(defaults.results_file, PathBuf::from),
            scanner_endpoint: get(ENV_SCANNER_ENDPOINT).unwrap_or(defaults.scanner_endpoint),
            event_endpoint: get(ENV_EVENT_ENDPOINT).unwrap_or(defaults.event_endpoint),
            blob_root: get(ENV_BLOB_ROOT).map_or(defaults.blob_root, PathBuf::from),
            docker_start_wait_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.shell, "sh");
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.results_file,
            PathBuf::from("/polling-plugin/results.json")
        );
        assert_eq!(config.docker_start_wait_secs, 150);
    }

    #[test]
    fn test_config_from_lookup_overrides() {
        let vars = HashMap::from([
            (ENV_SHELL, "bash"),
            (ENV_WORKSPACE_ROOT, "/work"),
            (ENV_DOCKER_START_WAIT, "30"),
            (ENV_LOG_LEVEL, ""),
        ]);
        let config = Config::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.shell, "bash");
        assert_eq!(config.workspace_root, PathBuf::from("/work"));
        assert_eq!(config.docker_start_wait_secs, 30);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_wait_keeps_default() {
        let config = Config::from_lookup(|k| (k == ENV_DOCKER_START_WAIT).then(|| "soon".to_string()));
        assert_eq!(config.docker_start_wait_secs, 150);
    }
}
