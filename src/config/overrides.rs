//! Command line and environment overrides layered over the config file.
//!
//! Overrides are kept for the life of the process and applied to every
//! revision of the file, so a reload never drops a `BACKENDS` list or a
//! `--strategy` given at startup.

use crate::affinity::StickyMode;
use crate::config::schema::{BackendConfig, ProxyConfig};
use crate::load_balancer::StrategyKind;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub backends: Option<Vec<BackendConfig>>,
    pub strategy: Option<StrategyKind>,
    pub sticky: Option<StickyMode>,
}

impl ConfigOverrides {
    /// Overwrite the fields that were given, then fall back to the default
    /// backends if the result names none.
    pub fn apply(&self, config: &mut ProxyConfig) {
        if let Some(bind_address) = &self.bind_address {
            config.listener.bind_address = bind_address.clone();
        }
        if let Some(backends) = &self.backends {
            config.backends = backends.clone();
        }
        if let Some(strategy) = self.strategy {
            config.balancer.strategy = strategy;
        }
        if let Some(sticky) = self.sticky {
            config.balancer.sticky = sticky;
        }
        if config.backends.is_empty() {
            config.backends = ProxyConfig::default_backends();
        }
    }
}
