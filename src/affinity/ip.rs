//! IP-based session affinity.
//!
//! Stateless: the client IP is hashed into the current healthy set with the
//! same mapping as the IP-hash strategy. No TTL, no server-side entries.

use crate::load_balancer::ip_hash::ip_to_index;
use crate::load_balancer::BackendPool;

#[derive(Debug, Default, Clone, Copy)]
pub struct IpAffinity;

impl IpAffinity {
    pub fn new() -> Self {
        Self
    }

    /// Backend for `client_ip` among the currently healthy backends.
    pub fn select(&self, pool: &dyn BackendPool, client_ip: &str) -> Option<String> {
        let mut healthy = pool.healthy_snapshot();
        let index = ip_to_index(client_ip, healthy.len())?;
        Some(healthy.swap_remove(index).address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{BackendRegistry, ClientContext, IpHash, LoadBalancer};

    #[test]
    fn test_matches_ip_hash_strategy() {
        let registry = BackendRegistry::from_backends([("http://a", 1), ("http://b", 1), ("http://c", 1)]);
        for ip in ["10.1.2.3", "172.16.0.9", "2001:db8::42", "garbage"] {
            let ctx = ClientContext::new().with_client_ip(ip);
            assert_eq!(
                IpAffinity::new().select(&registry, ip),
                IpHash::new().next_server(&registry, &ctx)
            );
        }
    }

    #[test]
    fn test_no_healthy_backend() {
        let registry = BackendRegistry::from_backends([("http://a", 1)]);
        registry.set_health("http://a", false);
        assert_eq!(IpAffinity::new().select(&registry, "10.0.0.1"), None);
    }
}
