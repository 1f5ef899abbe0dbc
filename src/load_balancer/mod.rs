//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request → affinity (maybe short-circuits)
//!     → registry.rs (ordered snapshot of healthy backends)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through backends)
//!         - weighted.rs (cumulative-weight table over the same snapshot)
//!         - least_conn.rs (pick backend with fewest active requests)
//!         - ip_hash.rs (client address → index)
//!     → backend.rs (ActiveGuard around the forwarding call)
//! ```
//!
//! # Design Decisions
//! - Strategies depend only on the `BackendPool` capability trait
//! - Unhealthy backends never appear in a snapshot
//! - "No backend available" is `None`, never a panic

pub mod backend;
pub mod error;
pub mod ip_hash;
pub mod least_conn;
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use backend::{ActiveGuard, Backend, BackendSnapshot};
pub use error::{LoadBalancerError, LoadBalancerResult};
pub use ip_hash::IpHash;
pub use least_conn::LeastConnections;
pub use registry::{BackendPool, BackendRegistry};
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

/// Per-request facts a strategy or affinity layer may look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    /// Resolved client IP (forwarded-for first entry, else peer address).
    pub client_ip: Option<String>,
    /// Value of the sticky cookie, if the request carried one.
    pub sticky_token: Option<String>,
}

impl ClientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_sticky_token(mut self, token: impl Into<String>) -> Self {
        self.sticky_token = Some(token.into());
        self
    }
}

/// A backend selection algorithm.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick one healthy backend address. `None` iff the healthy set is empty.
    fn next_server(&self, pool: &dyn BackendPool, client: &ClientContext) -> Option<String>;

    /// Configuration name of the strategy.
    fn name(&self) -> &'static str;
}

/// The strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[serde(rename = "roundrobin")]
    RoundRobin,
    #[default]
    Weighted,
    Least,
    #[serde(rename = "iphash")]
    IpHash,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "roundrobin",
            StrategyKind::Weighted => "weighted",
            StrategyKind::Least => "least",
            StrategyKind::IpHash => "iphash",
        }
    }

    /// Create a fresh strategy instance with its own counter.
    pub fn build(&self) -> Box<dyn LoadBalancer> {
        match self {
            StrategyKind::RoundRobin => Box::new(RoundRobin::new()),
            StrategyKind::Weighted => Box::new(WeightedRoundRobin::new()),
            StrategyKind::Least => Box::new(LeastConnections::new()),
            StrategyKind::IpHash => Box::new(IpHash::new()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = LoadBalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roundrobin" => Ok(StrategyKind::RoundRobin),
            "weighted" => Ok(StrategyKind::Weighted),
            "least" => Ok(StrategyKind::Least),
            "iphash" => Ok(StrategyKind::IpHash),
            _ => Err(LoadBalancerError::InvalidStrategy(s.to_string())),
        }
    }
}
