//! IP-hash load balancing strategy.
//!
//! IPv4 clients map to `(a + b + c + d) % n`. IPv6 and unparsable inputs map
//! to the first byte of a SHA-256 digest of their string form, modulo `n`.
//!
//! The modulus is the current healthy-set size, so any change in the number
//! of healthy backends reshuffles most clients. Keeping assignments stable
//! under churn would need a consistent-hashing ring, which this strategy
//! does not attempt.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::load_balancer::{BackendPool, ClientContext, LoadBalancer};

/// Map a client address to an index in `[0, n)`. `None` when `n == 0`.
pub fn ip_to_index(client_ip: &str, n: usize) -> Option<usize> {
    if n == 0 {
        return None;
    }
    let ip: Option<IpAddr> = client_ip.trim().parse().ok();
    let ipv4 = match ip {
        Some(IpAddr::V4(v4)) => Some(v4),
        Some(IpAddr::V6(v6)) => v6.to_ipv4_mapped(),
        None => None,
    };

    let index = match (ipv4, ip) {
        (Some(v4), _) => v4.octets().iter().map(|&o| o as usize).sum::<usize>() % n,
        (None, Some(v6)) => first_digest_byte(&v6.to_string()) % n,
        (None, None) => first_digest_byte(client_ip) % n,
    };
    Some(index)
}

fn first_digest_byte(input: &str) -> usize {
    Sha256::digest(input.as_bytes())[0] as usize
}

/// IP-hash selector. Stateless.
#[derive(Debug, Default)]
pub struct IpHash;

impl IpHash {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for IpHash {
    fn next_server(&self, pool: &dyn BackendPool, client: &ClientContext) -> Option<String> {
        let mut healthy = pool.healthy_snapshot();
        let key = client.client_ip.as_deref().unwrap_or_default();
        let index = ip_to_index(key, healthy.len())?;
        Some(healthy.swap_remove(index).address)
    }

    fn name(&self) -> &'static str {
        "iphash"
    }
}
