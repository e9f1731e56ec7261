//! Configuration management for AnyAgent
//!
//! Configuration is loaded from `~/.anyagent/config.json` with environment
//! variable overrides of the form `ANYAGENT_SECTION_KEY`.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{AgentError, Result};
use std::path::{Path, PathBuf};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "ANYAGENT_";

impl Config {
    /// Returns the AnyAgent configuration directory path (~/.anyagent)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".anyagent")
    }

    /// Returns the path to the config file (~/.anyagent/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                AgentError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Unparseable numeric values are ignored and the file value is kept.
    fn apply_env_overrides(&mut self) {
        // Server
        if let Some(val) = env_var("SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(v) = env_parse("SERVER_PORT") {
            self.server.port = v;
        }
        if let Some(v) = env_parse("SERVER_MAX_FRAME_BYTES") {
            self.server.max_frame_bytes = v;
        }

        // Session
        if let Some(v) = env_parse("SESSION_TURN_TIMEOUT_SECS") {
            self.session.turn_timeout_secs = v;
        }
        if let Some(v) = env_parse("SESSION_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs = v;
        }
        if let Some(v) = env_parse("SESSION_BUFFER_SIZE") {
            self.session.buffer_size = v;
        }

        // Pricing
        if let Some(val) = env_var("PRICING_POLICY") {
            match val.as_str() {
                "deliver_regardless" => self.pricing.policy = PaymentPolicy::DeliverRegardless,
                "withhold_until_paid" => self.pricing.policy = PaymentPolicy::WithholdUntilPaid,
                _ => {}
            }
        }

        // Logging
        if let Some(val) = env_var("LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = env_var("LOGGING_FORMAT") {
            match val.as_str() {
                "pretty" => self.logging.format = LogFormat::Pretty,
                "component" => self.logging.format = LogFormat::Component,
                "json" => self.logging.format = LogFormat::Json,
                _ => {}
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

fn env_parse<T: std::str::FromStr>(suffix: &str) -> Option<T> {
    env_var(suffix).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 50051);
        assert_eq!(config.server.addr(), "0.0.0.0:50051");
        assert_eq!(config.session.turn_timeout_secs, 120);
        assert_eq!(config.session.idle_timeout_secs, 0);
        assert_eq!(config.pricing.policy, PaymentPolicy::DeliverRegardless);
        assert!(config.pricing.prices.is_empty());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server":{"port":6000},"pricing":{"prices":{"text":5}}}"#)
                .unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.pricing.prices.get("text"), Some(&5));
        assert_eq!(config.session.buffer_size, 32);
    }

    #[test]
    fn test_payment_policy_deserialize() {
        let cfg: PricingConfig =
            serde_json::from_str(r#"{"policy":"withhold_until_paid"}"#).unwrap();
        assert_eq!(cfg.policy, PaymentPolicy::WithholdUntilPaid);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.session.buffer_size, 32);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.session.turn_timeout_secs = 9;
        config.pricing.prices.insert("image".into(), 10);
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.session.turn_timeout_secs, 9);
        assert_eq!(loaded.pricing.prices.get("image"), Some(&10));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load_from_path(&path),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_env_override_port() {
        std::env::set_var("ANYAGENT_SERVER_PORT", "7070");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("ANYAGENT_SERVER_PORT");
        assert_eq!(config.server.port, 7070);
    }
}
