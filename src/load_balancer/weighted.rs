//! Weighted round-robin load balancing strategy.
//!
//! Each healthy backend owns a half-open slot range `[cum_before, cum_before + weight)`
//! in a table built from one sorted snapshot. The total weight and the scan
//! both come from that same snapshot, so a given counter value always maps
//! to the same backend for the same membership.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::load_balancer::{BackendPool, BackendSnapshot, ClientContext, LoadBalancer};

/// Weighted round-robin selector.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    counter: AtomicU64,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cumulative upper bounds, one per backend, in snapshot order.
fn cumulative_table(healthy: &[BackendSnapshot]) -> Vec<u64> {
    healthy
        .iter()
        .scan(0u64, |cum, b| {
            *cum += b.weight as u64;
            Some(*cum)
        })
        .collect()
}

impl LoadBalancer for WeightedRoundRobin {
    fn next_server(&self, pool: &dyn BackendPool, _client: &ClientContext) -> Option<String> {
        // One increment per attempt, including attempts that find nothing.
        let previous = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut healthy = pool.healthy_snapshot();
        let table = cumulative_table(&healthy);
        // Weights are >= 1, so a non-empty snapshot has a non-zero total.
        let total = *table.last()?;

        let slot = previous % total;
        let index = table.iter().position(|&upper| slot < upper)?;
        Some(healthy.swap_remove(index).address)
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}
