//! Session affinity subsystem.
//!
//! # Data Flow
//! ```text
//! ClientContext
//!     → Balancer::select
//!         - cookie mode: cookie.rs lookup (live + healthy?) → done
//!         - ip mode: ip.rs hash of client IP → done
//!     → otherwise the configured LoadBalancer strategy
//!     → cookie mode: bind the choice under a new client ID (Set-Cookie)
//! ```
//!
//! # Design Decisions
//! - Affinity is consulted before the strategy and may short-circuit it
//! - Sticky entries name backends by address; the registry owns lifecycle
//! - Sticky state is in-memory and local to this instance

pub mod cookie;
pub mod ip;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use cookie::{CookieAffinity, StickyEntry};
pub use ip::IpAffinity;

use crate::config::BalancerConfig;
use crate::load_balancer::{
    BackendPool, BackendRegistry, ClientContext, LoadBalancer, LoadBalancerError,
};

/// How clients are pinned to backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickyMode {
    #[default]
    None,
    Cookie,
    Ip,
}

impl StickyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StickyMode::None => "none",
            StickyMode::Cookie => "cookie",
            StickyMode::Ip => "ip",
        }
    }
}

impl fmt::Display for StickyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StickyMode {
    type Err = LoadBalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(StickyMode::None),
            "cookie" => Ok(StickyMode::Cookie),
            "ip" => Ok(StickyMode::Ip),
            _ => Err(LoadBalancerError::InvalidStickyMode(s.to_string())),
        }
    }
}

#[derive(Debug)]
enum Affinity {
    None,
    Cookie(CookieAffinity),
    Ip(IpAffinity),
}

/// Result of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Backend that should receive the request.
    pub address: String,
    /// New client ID the response must carry in the sticky cookie.
    pub sticky_cookie: Option<String>,
}

impl Selection {
    fn plain(address: String) -> Self {
        Self {
            address,
            sticky_cookie: None,
        }
    }
}

/// Affinity layer composed with a selection strategy over one registry.
#[derive(Debug)]
pub struct Balancer {
    registry: Arc<BackendRegistry>,
    strategy: Box<dyn LoadBalancer>,
    affinity: Affinity,
}

impl Balancer {
    pub fn new(
        registry: Arc<BackendRegistry>,
        strategy: Box<dyn LoadBalancer>,
        sticky: StickyMode,
        cookie_ttl: Duration,
    ) -> Self {
        let affinity = match sticky {
            StickyMode::None => Affinity::None,
            StickyMode::Cookie => Affinity::Cookie(CookieAffinity::new(cookie_ttl)),
            StickyMode::Ip => Affinity::Ip(IpAffinity::new()),
        };
        Self {
            registry,
            strategy,
            affinity,
        }
    }

    pub fn from_config(registry: Arc<BackendRegistry>, config: &BalancerConfig) -> Self {
        Self::new(
            registry,
            config.strategy.build(),
            config.sticky,
            Duration::from_secs(config.cookie_ttl_secs),
        )
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn sticky_mode(&self) -> StickyMode {
        match self.affinity {
            Affinity::None => StickyMode::None,
            Affinity::Cookie(_) => StickyMode::Cookie,
            Affinity::Ip(_) => StickyMode::Ip,
        }
    }

    pub fn cookie_affinity(&self) -> Option<&CookieAffinity> {
        match &self.affinity {
            Affinity::Cookie(cookie) => Some(cookie),
            _ => None,
        }
    }

    /// Number of live sticky entries (cookie mode only).
    pub fn sticky_entries(&self) -> usize {
        self.cookie_affinity().map_or(0, CookieAffinity::len)
    }

    /// Choose a backend for the request. `None` iff nothing is healthy.
    pub fn select(&self, client: &ClientContext) -> Option<Selection> {
        match &self.affinity {
            Affinity::None => self.from_strategy(client).map(Selection::plain),
            Affinity::Ip(ip) => {
                let key = client.client_ip.as_deref().unwrap_or_default();
                ip.select(self.registry.as_ref(), key).map(Selection::plain)
            }
            Affinity::Cookie(cookie) => self.select_sticky(cookie, client),
        }
    }

    fn from_strategy(&self, client: &ClientContext) -> Option<String> {
        let pool: &dyn BackendPool = self.registry.as_ref();
        self.strategy.next_server(pool, client)
    }

    fn select_sticky(&self, cookie: &CookieAffinity, client: &ClientContext) -> Option<Selection> {
        if let Some(token) = client.sticky_token.as_deref() {
            match cookie.lookup(token) {
                Some(address) if self.registry.is_healthy(&address) => {
                    return Some(Selection::plain(address));
                }
                Some(address) => {
                    tracing::debug!(backend = %address, "Sticky backend unavailable, rebinding client");
                }
                None => {}
            }
        }

        let address = self.from_strategy(client)?;
        if let Some(token) = client.sticky_token.as_deref() {
            cookie.remove(token);
        }
        let client_id = cookie.bind(&address);
        Some(Selection {
            address,
            sticky_cookie: Some(client_id),
        })
    }
}
