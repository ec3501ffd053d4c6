//! # Real-Time Configuration
//!
//! Backoff, force-reconnect and alerting settings. Every field has a default,
//! so an empty JSON object is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{RealtimeError, RealtimeResult};
use super::health::AlertPolicy;

/// Exponential backoff for per-channel retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry (default: 1000ms)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on any retry delay (default: 30000ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor per consecutive failure (default: 2.0)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Consecutive failures before a channel is suspended (0 = never)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based), capped at `max_delay_ms`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether `attempts` consecutive failures exhaust the retry budget
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }

    fn validate(&self) -> RealtimeResult<()> {
        if self.initial_delay_ms == 0 {
            return Err(RealtimeError::ConfigError(
                "initial_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RealtimeError::ConfigError(format!(
                "max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if !(self.multiplier >= 1.0) {
            return Err(RealtimeError::ConfigError(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Configuration for the realtime client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-channel retry backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Upper bound on how long `force_reconnect_all` waits for channels to settle
    #[serde(default = "default_force_reconnect_timeout_ms")]
    pub force_reconnect_timeout_ms: u64,

    /// Escalation threshold for partial connectivity
    #[serde(default)]
    pub alert: AlertPolicy,
}

fn default_force_reconnect_timeout_ms() -> u64 {
    15_000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            force_reconnect_timeout_ms: default_force_reconnect_timeout_ms(),
            alert: AlertPolicy::default(),
        }
    }
}

impl RealtimeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> RealtimeResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| RealtimeError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json_str(content: &str) -> RealtimeResult<Self> {
        let config: RealtimeConfig = serde_json::from_str(content)
            .map_err(|e| RealtimeError::ConfigError(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> RealtimeResult<()> {
        self.reconnect.validate()?;

        if self.force_reconnect_timeout_ms == 0 {
            return Err(RealtimeError::ConfigError(
                "force_reconnect_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let ratio = self.alert.min_connected_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(RealtimeError::ConfigError(format!(
                "alert.min_connected_ratio must be in (0, 1], got {}",
                ratio
            )));
        }

        Ok(())
    }

    pub fn force_reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.force_reconnect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.reconnect.initial_delay_ms, 1000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.force_reconnect_timeout_ms, 15_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = RealtimeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RealtimeConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config =
            RealtimeConfig::from_json_str(r#"{"reconnect": {"initial_delay_ms": 250}}"#).unwrap();
        assert_eq!(config.reconnect.initial_delay_ms, 250);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            max_attempts: 0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
        assert!(!config.is_exhausted(1_000_000));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(RealtimeConfig::from_json_str(r#"{"reconnect": {"initial_delay_ms": 0}}"#).is_err());
        assert!(RealtimeConfig::from_json_str(
            r#"{"reconnect": {"initial_delay_ms": 5000, "max_delay_ms": 100}}"#
        )
        .is_err());
        assert!(RealtimeConfig::from_json_str(r#"{"reconnect": {"multiplier": 0.5}}"#).is_err());
        assert!(RealtimeConfig::from_json_str(r#"{"alert": {"min_connected_ratio": 0}}"#).is_err());
        assert!(RealtimeConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"force_reconnect_timeout_ms": 500}}"#).unwrap();

        let config = RealtimeConfig::load(file.path()).unwrap();
        assert_eq!(config.force_reconnect_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RealtimeConfig::load(Path::new("/nonexistent/realtime.json")).unwrap_err();
        assert!(matches!(err, RealtimeError::ConfigError(_)));
    }
}
