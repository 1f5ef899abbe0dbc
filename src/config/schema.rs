//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::affinity::StickyMode;
use crate::load_balancer::StrategyKind;

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Strategy and session affinity settings.
    pub balancer: BalancerConfig,

    /// Backend server definitions.
    pub backends: Vec<BackendConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Backends used when none are configured.
    pub fn default_backends() -> Vec<BackendConfig> {
        (8081..=8083)
            .map(|port| BackendConfig::new(format!("http://localhost:{port}"), 1))
            .collect()
    }

    /// `(url, weight)` pairs for the registry.
    pub fn backend_entries(&self) -> Vec<(String, i64)> {
        self.backends
            .iter()
            .map(|b| (b.url(), b.weight))
            .collect()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Selection strategy and affinity settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BalancerConfig {
    /// One of `roundrobin`, `weighted`, `least`, `iphash`.
    pub strategy: StrategyKind,

    /// One of `none`, `cookie`, `ip`.
    pub sticky: StickyMode,

    /// Name of the sticky cookie.
    pub cookie_name: String,

    /// Lifetime of a cookie binding in seconds.
    pub cookie_ttl_secs: u64,

    /// How often expired bindings are swept, in seconds. 0 disables the janitor.
    pub sticky_sweep_secs: u64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Weighted,
            sticky: StickyMode::None,
            cookie_name: "LB-STICKY".to_string(),
            cookie_ttl_secs: 30 * 24 * 60 * 60,
            sticky_sweep_secs: 60,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Backend URL (e.g., "http://127.0.0.1:3000"). A bare `host:port`
    /// is treated as plain HTTP.
    pub address: String,

    /// Weight for weighted load balancing (default: 1). Values below 1
    /// are raised to 1.
    #[serde(default = "default_weight")]
    pub weight: i64,
}

fn default_weight() -> i64 {
    1
}

impl BackendConfig {
    pub fn new(address: impl Into<String>, weight: i64) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }

    /// Normalized base URL: scheme added if missing, trailing slash removed.
    pub fn url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Status code a healthy backend answers with.
    pub expected_status: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            timeout_secs: 2,
            path: "/health".to_string(),
            expected_status: 200,
        }
    }
}

/// Timeout configuration for forwarding.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            request_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
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
