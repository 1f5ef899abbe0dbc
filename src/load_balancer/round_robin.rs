//! Round-robin load balancing strategy.
//!
//! Cyclic fairness holds between consecutive calls while membership is
//! stable. When the healthy set grows or shrinks the index is taken modulo
//! the new length, so one selection may skip or repeat a backend.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::load_balancer::{BackendPool, ClientContext, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, pool: &dyn BackendPool, _client: &ClientContext) -> Option<String> {
        // One increment per attempt, including attempts that find nothing.
        // fetch_add returns the pre-increment value, i.e. counter - 1.
        let previous = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut healthy = pool.healthy_snapshot();
        if healthy.is_empty() {
            return None;
        }

        let index = (previous % healthy.len() as u64) as usize;
        Some(healthy.swap_remove(index).address)
    }

    fn name(&self) -> &'static str {
        "roundrobin"
    }
}
