//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server, keyed by its address
//! - Track active connections (for Least Connections LB)
//! - Carry the health flag written by the health monitor

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// A single backend server.
///
/// Records are owned by the `BackendRegistry`; the counters are atomic so
/// the request path never waits on the registry's structural lock.
#[derive(Debug)]
pub struct Backend {
    /// Base URL of the backend, e.g. `http://10.0.0.5:8081`. Unique key.
    address: String,
    /// Relative weight, always >= 1.
    weight: u32,
    /// Health flag. Written only while the registry's write lock is held.
    healthy: AtomicBool,
    /// Number of requests currently in flight.
    active_connections: AtomicUsize,
}

impl Backend {
    /// Create a new backend. Non-positive weights are coerced to 1.
    pub fn new(address: impl Into<String>, weight: i64) -> Self {
        Self {
            address: address.into(),
            weight: normalize_weight(weight),
            healthy: AtomicBool::new(true),
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Store the flag and return the previous value.
    pub(crate) fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count, flooring at zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Increment the active count and return a guard that decrements this
    /// same record on drop.
    pub fn guard(self: &Arc<Self>) -> ActiveGuard {
        self.inc_connections();
        ActiveGuard {
            backend: self.clone(),
        }
    }

    /// Copy the current state out of the live record.
    pub fn snapshot(&self) -> BackendSnapshot {
        BackendSnapshot {
            address: self.address.clone(),
            weight: self.weight,
            healthy: self.is_healthy(),
            active_connections: self.active_connections(),
        }
    }
}

/// Clamp a configured weight into the valid range.
pub fn normalize_weight(weight: i64) -> u32 {
    weight.clamp(1, u32::MAX as i64) as u32
}

/// Point-in-time copy of a backend. Holds no reference into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub address: String,
    pub weight: u32,
    pub healthy: bool,
    pub active_connections: usize,
}

/// A RAII guard that manages the active connection count.
///
/// Created by [`Backend::guard`] or `BackendRegistry::acquire`. The guard
/// keeps the record it incremented, so the decrement lands there even if
/// the address was deregistered or re-registered in the meantime.
#[derive(Debug)]
pub struct ActiveGuard {
    backend: Arc<Backend>,
}

impl ActiveGuard {
    pub fn address(&self) -> &str {
        self.backend.address()
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.backend.dec_connections();
    }
}
