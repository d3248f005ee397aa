//! Configuration types for Parley

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Address to listen on
    pub listen_addr: String,

    /// Port serving clients and node registrations
    pub client_port: u16,

    /// Registry sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Remote call configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Two-phase commit configuration
    #[serde(default)]
    pub two_phase: TwoPhaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            client_port: 7000,
            sweep: SweepConfig::default(),
            rpc: RpcConfig::default(),
            two_phase: TwoPhaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Validate the configuration. Fatal problems are returned as
    /// `Err(Vec<String>)`; warnings are logged but do not cause failure.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.client_port == 0 {
            errors.push("client_port must be > 0".to_string());
        }

        if self.sweep.interval.is_zero() {
            errors.push("sweep.interval must be > 0".to_string());
        }
        if self.sweep.probe_timeout.is_zero() {
            errors.push("sweep.probe_timeout must be > 0".to_string());
        }
        if self.sweep.probe_timeout >= self.sweep.interval {
            errors.push(format!(
                "sweep.probe_timeout ({:?}) must be shorter than sweep.interval ({:?})",
                self.sweep.probe_timeout, self.sweep.interval
            ));
        }

        if self.rpc.connect_timeout.is_zero() || self.rpc.request_timeout.is_zero() {
            errors.push("rpc timeouts must be > 0".to_string());
        }
        if self.rpc.max_frame_size < 1024 {
            errors.push(format!(
                "rpc.max_frame_size must be >= 1024, got {}",
                self.rpc.max_frame_size
            ));
        }

        if self.two_phase.commit_wait_timeout.is_zero() {
            errors.push("two_phase.commit_wait_timeout must be > 0".to_string());
        }

        if self.logging.format != "text" && self.logging.format != "json" {
            errors.push(format!(
                "logging.format must be \"text\" or \"json\", got \"{}\"",
                self.logging.format
            ));
        }

        if self.two_phase.commit_wait_timeout < self.rpc.request_timeout {
            tracing::warn!(
                "two_phase.commit_wait_timeout ({:?}) is shorter than rpc.request_timeout ({:?}); \
                 commits may time out while participants are still answering",
                self.two_phase.commit_wait_timeout,
                self.rpc.request_timeout
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Registry sweep (failure detector) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// How often the background sweep runs
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on a single reachability probe
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

/// Remote call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Connection timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Request timeout (covers the full request/response exchange)
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Maximum wire frame size in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_frame_size() -> usize {
    1024 * 1024 // 1MB
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Two-phase commit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoPhaseConfig {
    /// Upper bound on waiting for all commit acknowledgments
    #[serde(default = "default_commit_wait_timeout", with = "humantime_serde")]
    pub commit_wait_timeout: Duration,

    /// When true, a participant that cannot be reached during the vote
    /// aborts the transaction. The default preserves the fail-skip policy:
    /// unreachable participants are excluded from the vote denominator,
    /// trading strict atomicity for availability.
    #[serde(default)]
    pub require_full_quorum: bool,
}

fn default_commit_wait_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for TwoPhaseConfig {
    fn default() -> Self {
        Self {
            commit_wait_timeout: default_commit_wait_timeout(),
            require_full_quorum: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json or text)
    pub format: String,

    /// Log file path (None for stdout)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

/// Duration serialization helper
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.client_port, 7000);
        assert_eq!(config.sweep.interval, Duration::from_secs(60));
        assert!(!config.two_phase.require_full_quorum);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = CoordinatorConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: CoordinatorConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.client_port, config.client_port);
        assert_eq!(parsed.sweep.probe_timeout, config.sweep.probe_timeout);
        assert_eq!(
            parsed.two_phase.commit_wait_timeout,
            config.two_phase.commit_wait_timeout
        );
    }

    #[test]
    fn test_validate_catches_bad_values() {
        let mut config = CoordinatorConfig::default();
        config.client_port = 0;
        config.sweep.probe_timeout = Duration::from_secs(120);
        config.logging.format = "xml".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CoordinatorConfig = toml::from_str(
            r#"
            listen_addr = "127.0.0.1"
            client_port = 7100

            [sweep]
            interval = "30s"
            "#,
        )
        .unwrap();

        assert_eq!(config.client_port, 7100);
        assert_eq!(config.sweep.interval, Duration::from_secs(30));
        assert_eq!(config.sweep.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.rpc.request_timeout, Duration::from_secs(10));
    }
}
