//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! carry their defaults in `Default` impls.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound accepted for `max_body_bytes` (8 MiB).
pub const MAX_BODY_BYTES_LIMIT: u64 = 8 * 1024 * 1024;

/// Upper bound accepted for `cpu_threshold_per_mille`.
pub const CPU_THRESHOLD_LIMIT: u64 = 1000;

/// Root configuration file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Serving engine settings.
    pub server: ServingConfig,

    /// Optional backend the RPC proxy forwards to.
    pub backend: Option<BackendConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Serving engine configuration. Immutable once loaded.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Bind host.
    pub host: String,

    /// Bind port (0 picks an ephemeral port).
    pub port: u16,

    /// Log every request at INFO instead of DEBUG.
    pub verbose: bool,

    /// Maximum concurrently admitted requests (0 = unlimited).
    pub max_connections: usize,

    /// Maximum request body size in bytes (0 = unlimited).
    pub max_body_bytes: u64,

    /// Per-request deadline in milliseconds (0 = none).
    pub timeout_millis: u64,

    /// CPU usage in per-mille above which requests are shed (0 = never shed).
    pub cpu_threshold_per_mille: u64,

    /// Grace period for in-flight requests on stop, in milliseconds.
    pub shutdown_grace_millis: u64,

    /// Cross-origin settings.
    pub cors: Option<CorsConfig>,

    /// Request signature policy.
    pub signature: Option<SignatureConfig>,
}

impl ServingConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_millis > 0).then(|| Duration::from_millis(self.timeout_millis))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_millis)
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            verbose: false,
            max_connections: 10_000,
            max_body_bytes: 1024 * 1024,
            timeout_millis: 3000,
            cpu_threshold_per_mille: 900,
            shutdown_grace_millis: 5500,
            cors: None,
            signature: None,
        }
    }
}

/// Allowed cross-origin request origins. Empty allows every origin.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    pub origins: Vec<String>,
}

/// Request signature policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Reject requests failing verification (otherwise only record them).
    pub strict: bool,

    /// Maximum age of a signed timestamp, in seconds.
    pub expiry_secs: u64,

    /// Trusted keys, unique by fingerprint.
    pub private_keys: Vec<PrivateKeyConfig>,
}

impl SignatureConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            strict: false,
            expiry_secs: 3600,
            private_keys: Vec::new(),
        }
    }
}

/// One signing key.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrivateKeyConfig {
    /// Identifier clients send to select the key.
    pub fingerprint: String,

    /// File holding the key material.
    pub key_file: PathBuf,
}

/// Backend targeted by the RPC proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address, `host:port` or `http://host:port`.
    pub target: String,

    /// Connections opened per tenant client.
    pub pool_size: usize,

    /// Connect + handshake timeout per connection, in milliseconds.
    pub dial_timeout_millis: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:9000".to_string(),
            pool_size: 4,
            dial_timeout_millis: 3000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
