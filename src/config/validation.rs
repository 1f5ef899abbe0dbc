//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend URLs and reject duplicates
//! - Validate value ranges (intervals > 0, status codes valid)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::affinity::StickyMode;
use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("invalid backend address '{address}': {reason}")]
    InvalidBackendAddress { address: String, reason: String },

    #[error("duplicate backend '{0}'")]
    DuplicateBackend(String),

    #[error("health_check.{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("health_check.path must start with '/': '{0}'")]
    InvalidHealthPath(String),

    #[error("health_check.expected_status {0} is not a valid HTTP status")]
    InvalidExpectedStatus(u16),

    #[error("balancer.cookie_name '{0}' is not a valid cookie name")]
    InvalidCookieName(String),

    #[error("balancer.cookie_ttl_secs must be greater than zero in cookie mode")]
    ZeroCookieTtl,

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("{field} must not exceed {max} seconds")]
    DurationTooLarge { field: &'static str, max: u64 },
}

/// Upper bound for every duration setting (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(config.listener.bind_address.clone()));
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        let url = backend.url();
        if let Err(reason) = check_backend_url(&url) {
            errors.push(ValidationError::InvalidBackendAddress {
                address: backend.address.clone(),
                reason,
            });
            continue;
        }
        if !seen.insert(url.clone()) {
            errors.push(ValidationError::DuplicateBackend(url));
        }
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::ZeroDuration("interval_secs"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::ZeroDuration("timeout_secs"));
        }
        if !health.path.starts_with('/') {
            errors.push(ValidationError::InvalidHealthPath(health.path.clone()));
        }
        if !(100..=599).contains(&health.expected_status) {
            errors.push(ValidationError::InvalidExpectedStatus(health.expected_status));
        }
    }

    let balancer = &config.balancer;
    if balancer.sticky == StickyMode::Cookie {
        if !is_cookie_name(&balancer.cookie_name) {
            errors.push(ValidationError::InvalidCookieName(balancer.cookie_name.clone()));
        }
        if balancer.cookie_ttl_secs == 0 {
            errors.push(ValidationError::ZeroCookieTtl);
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let durations = [
        ("balancer.cookie_ttl_secs", balancer.cookie_ttl_secs),
        ("balancer.sticky_sweep_secs", balancer.sticky_sweep_secs),
        ("health_check.interval_secs", config.health_check.interval_secs),
        ("health_check.timeout_secs", config.health_check.timeout_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, secs) in durations {
        if secs > MAX_DURATION_SECS {
            errors.push(ValidationError::DurationTooLarge {
                field,
                max: MAX_DURATION_SECS,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_backend_url(url: &str) -> Result<(), String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;
    if parsed.scheme() != "http" {
        return Err(format!("unsupported scheme '{}'", parsed.scheme()));
    }
    if parsed.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}

/// RFC 6265 token characters.
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
