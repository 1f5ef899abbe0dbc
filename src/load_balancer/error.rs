//! Load balancer error types.

use thiserror::Error;

/// Errors raised while assembling the balancer from configuration.
///
/// Selection itself never fails with an error: an empty healthy set is
/// reported as `None`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadBalancerError {
    /// Strategy name not recognised.
    #[error("invalid strategy '{0}' (expected roundrobin, weighted, least or iphash)")]
    InvalidStrategy(String),

    /// Sticky mode name not recognised.
    #[error("invalid sticky mode '{0}' (expected none, cookie or ip)")]
    InvalidStickyMode(String),
}

/// Result type for load balancer operations.
pub type LoadBalancerResult<T> = Result<T, LoadBalancerError>;
