//! Global configuration model for the Rigging engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RiggingError};

/// Root configuration for the Rigging engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiggingConfig {
    /// Directory holding per-stack state files.
    pub state_dir: PathBuf,
    /// Maximum number of resource operations running at once.
    pub jobs: usize,
    /// Backoff policy for retry-safe operations.
    pub retry: RetrySettings,
    /// `kubectl` executable.
    pub kubectl: String,
    /// `helm` executable.
    pub helm: String,
    /// Kubeconfig passed to `kubectl` and `helm` (ambient config if unset).
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context passed to `kubectl` and `helm`.
    pub kube_context: Option<String>,
    /// Seconds between cluster readiness polls.
    pub cluster_poll_interval_secs: u64,
    /// Seconds to wait for a new cluster to become ready.
    pub cluster_ready_timeout_secs: u64,
}

impl Default for RiggingConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(crate::constants::DEFAULT_STATE_DIR),
            jobs: crate::constants::DEFAULT_JOBS,
            retry: RetrySettings::default(),
            kubectl: "kubectl".into(),
            helm: "helm".into(),
            kubeconfig: None,
            kube_context: None,
            cluster_poll_interval_secs: 10,
            cluster_ready_timeout_secs: 30 * 60,
        }
    }
}

impl RiggingConfig {
    /// Loads configuration from a YAML file; missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RiggingError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| RiggingError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `RiggingError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(RiggingError::Config {
                message: "jobs must be at least 1".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(RiggingError::Config {
                message: "retry.max_attempts must be at least 1".into(),
            });
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(RiggingError::Config {
                message: format!(
                    "retry.multiplier must be a finite number >= 1.0, got {}",
                    self.retry.multiplier
                ),
            });
        }
        if self.cluster_poll_interval_secs == 0 {
            return Err(RiggingError::Config {
                message: "cluster_poll_interval_secs must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Interval between cluster readiness polls, never shorter than a second.
    #[must_use]
    pub const fn cluster_poll_interval(&self) -> Duration {
        if self.cluster_poll_interval_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.cluster_poll_interval_secs)
        }
    }

    /// Maximum time to wait for cluster readiness.
    #[must_use]
    pub const fn cluster_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_ready_timeout_secs)
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RiggingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs, 4);
        assert_eq!(config.state_dir, PathBuf::from(".rigging"));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rigging.yaml");
        std::fs::write(&path, "jobs: 8\nretry:\n  max_attempts: 5\n").expect("write");

        let config = RiggingConfig::load(&path).expect("load");
        assert_eq!(config.jobs, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.helm, "helm");
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rigging.yaml");
        std::fs::write(&path, "jobs: 0\n").expect("write");
        let err = RiggingConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("jobs"), "got: {err}");
    }

    #[test]
    fn multiplier_must_be_a_finite_growth_factor() {
        for multiplier in [f64::NAN, f64::INFINITY, 0.5] {
            let mut config = RiggingConfig::default();
            config.retry.multiplier = multiplier;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("retry.multiplier"), "got: {err}");
        }
        let mut config = RiggingConfig::default();
        config.retry.multiplier = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rigging.yaml");
        std::fs::write(&path, "cluster_poll_interval_secs: 0\n").expect("write");
        let err = RiggingConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("cluster_poll_interval_secs"), "got: {err}");

        let config = RiggingConfig {
            cluster_poll_interval_secs: 0,
            ..RiggingConfig::default()
        };
        assert_eq!(config.cluster_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config =
            RiggingConfig::load_or_default(&dir.path().join("absent.yaml")).expect("defaults");
        assert_eq!(config, RiggingConfig::default());
    }
}
