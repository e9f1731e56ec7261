//! Configuration type definitions for AnyAgent
//!
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so a partial (or missing) config file is always valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration struct for AnyAgent
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// RPC server configuration
    pub server: ServerConfig,
    /// Execution session limits
    pub session: SessionConfig,
    /// Agent-side prices and payment policy
    pub pricing: PricingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Server Configuration
// ============================================================================

/// RPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Largest accepted frame in bytes (media payloads included)
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding or connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Execution session limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-turn timeout in seconds (0 disables)
    pub turn_timeout_secs: u64,
    /// Stream session idle timeout in seconds (0 disables)
    pub idle_timeout_secs: u64,
    /// Buffered emissions per session before the agent is back-pressured
    pub buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn_timeout_secs: 120,
            idle_timeout_secs: 0,
            buffer_size: 32,
        }
    }
}

// ============================================================================
// Pricing Configuration
// ============================================================================

/// When the agent delivers a priced artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPolicy {
    /// Declare the cost and deliver in the same turn
    #[default]
    DeliverRegardless,
    /// Declare the cost and deliver only once a request arrives with `paid = true`
    WithholdUntilPaid,
}

/// Agent-side price list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PricingConfig {
    /// Delivery policy for priced operations
    pub policy: PaymentPolicy,
    /// Pricing key -> quantity charged per operation
    pub prices: HashMap<String, i64>,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Default tracing pretty-print
    Pretty,
    /// Compact `[LEVEL] target message {fields}` lines
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Optional file to append JSON logs to
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
