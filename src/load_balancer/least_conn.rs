//! Least Connections load balancing strategy.

use crate::load_balancer::{BackendPool, ClientContext, LoadBalancer};

/// Least connections selector.
/// Selects the backend with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, pool: &dyn BackendPool, _client: &ClientContext) -> Option<String> {
        // min_by_key keeps the first minimum, so ties go to the lowest
        // address in snapshot order.
        pool.healthy_snapshot()
            .into_iter()
            .min_by_key(|b| b.active_connections)
            .map(|b| b.address)
    }

    fn name(&self) -> &'static str {
        "least"
    }
}
