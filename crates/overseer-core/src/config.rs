//! Tunables for the supervisor and the service monitor

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverseerConfig {
    pub supervisor: SupervisorConfig,
    pub services: ServiceMonitorConfig,
}

impl OverseerConfig {
    /// Load from a JSON file; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorConfig {
    pub flush_interval_ms: u64,
    pub scrollback_max: usize,
    pub restart_settle_ms: u64,
    pub crash_tail_lines: usize,
    pub spawn_error_tail_chars: usize,
    pub agent_health_interval_secs: u64,
    pub pty_cols: u16,
    pub pty_rows: u16,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 16,
            scrollback_max: 10_000,
            restart_settle_ms: 1_000,
            crash_tail_lines: 50,
            spawn_error_tail_chars: 2_000,
            agent_health_interval_secs: 5,
            pty_cols: 120,
            pty_rows: 40,
        }
    }
}

impl SupervisorConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn agent_health_interval(&self) -> Duration {
        Duration::from_secs(self.agent_health_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceMonitorConfig {
    pub sweep_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub failure_threshold: u32,
    pub grace_window_secs: u64,
    pub scan_depth: usize,
    pub skip_dirs: Vec<String>,
    pub registration_file: String,
}

impl Default for ServiceMonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 8,
            probe_timeout_ms: 2_000,
            failure_threshold: 3,
            grace_window_secs: 10,
            scan_depth: 3,
            skip_dirs: [
                "node_modules",
                ".git",
                "target",
                "dist",
                "build",
                ".next",
                "venv",
                ".venv",
                "__pycache__",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            registration_file: ".services.json".to_string(),
        }
    }
}

impl ServiceMonitorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = OverseerConfig::load(dir.path().join("nope.json")).unwrap();
        assert_eq!(config.supervisor.scrollback_max, 10_000);
        assert_eq!(config.services.failure_threshold, 3);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"services": {"sweepIntervalSecs": 30}}"#).unwrap();

        let config = OverseerConfig::load(&path).unwrap();
        assert_eq!(config.services.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.services.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.supervisor.flush_interval(), Duration::from_millis(16));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(OverseerConfig::load(&path).is_err());
    }
}
