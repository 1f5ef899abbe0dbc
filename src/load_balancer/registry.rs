//! Backend registry.
//!
//! # Responsibilities
//! - Own every [`Backend`] record, keyed by address
//! - Serialize structural changes (register, deregister, health flips)
//! - Hand out ordered, independent snapshots of the healthy set
//! - Adjust per-backend load counters without blocking on structural changes

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::load_balancer::backend::{normalize_weight, ActiveGuard, Backend, BackendSnapshot};

/// The capability set the selection strategies depend on.
///
/// Strategies never see the registry type directly, so any pool that can
/// produce an ordered healthy snapshot is enough to drive them.
pub trait BackendPool: Send + Sync {
    /// Healthy backends, sorted by address.
    fn healthy_snapshot(&self) -> Vec<BackendSnapshot>;

    /// Sum of weights over the currently healthy backends.
    fn total_weight(&self) -> u64;

    /// Returns false if the address is unknown.
    fn increment_active(&self, address: &str) -> bool;

    /// Returns false if the address is unknown. Never drives the count below zero.
    fn decrement_active(&self, address: &str) -> bool;
}

/// Concurrency-safe set of backends.
///
/// A `BTreeMap` keeps iteration sorted by address, which is what makes
/// snapshots deterministic across calls with the same membership.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: RwLock<BTreeMap<String, Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `(address, weight)` pairs.
    pub fn from_backends<I, S>(backends: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let registry = Self::new();
        for (address, weight) in backends {
            registry.register(address, weight);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<Backend>>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Backend>>> {
        self.backends.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, address: &str) -> Option<Arc<Backend>> {
        self.read().get(address).cloned()
    }

    /// Insert or replace a backend. The new record starts healthy and idle.
    pub fn register(&self, address: impl Into<String>, weight: i64) {
        let address = address.into();
        let backend = Arc::new(Backend::new(address.clone(), weight));
        let weight = backend.weight();
        let replaced = self.write().insert(address.clone(), backend).is_some();
        tracing::info!(address = %address, weight, replaced, "Backend registered");
    }

    /// Remove a backend. Returns false if it was not registered.
    pub fn deregister(&self, address: &str) -> bool {
        let removed = self.write().remove(address).is_some();
        if removed {
            tracing::info!(address = %address, "Backend deregistered");
        } else {
            tracing::debug!(address = %address, "Deregister of unknown backend ignored");
        }
        removed
    }

    /// Set the health flag. Returns the previous flag, or `None` if the
    /// address is unknown.
    pub fn set_health(&self, address: &str, healthy: bool) -> Option<bool> {
        let backends = self.write();
        match backends.get(address) {
            Some(backend) => Some(backend.set_healthy(healthy)),
            None => {
                tracing::warn!(address = %address, healthy, "Health update for unknown backend ignored");
                None
            }
        }
    }

    /// True if the address is registered and currently healthy.
    pub fn is_healthy(&self, address: &str) -> bool {
        self.read().get(address).is_some_and(|b| b.is_healthy())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All registered addresses, sorted. Used by the health monitor.
    pub fn addresses(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Every backend regardless of health, sorted by address.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.read().values().map(|b| b.snapshot()).collect()
    }

    /// Increment the backend's active count and return a guard that
    /// decrements it on drop. `None` if the address is unknown.
    pub fn acquire(&self, address: &str) -> Option<ActiveGuard> {
        match self.lookup(address) {
            Some(backend) => Some(backend.guard()),
            None => {
                tracing::debug!(address = %address, "Acquire for unknown backend ignored");
                None
            }
        }
    }

    /// Bring the membership in line with `desired`.
    ///
    /// Unknown addresses are registered, addresses whose weight changed are
    /// replaced, and addresses missing from `desired` are deregistered.
    /// Unchanged backends keep their health and load state.
    pub fn reconcile<I, S>(&self, desired: I) -> ReconcileSummary
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let desired: BTreeMap<String, u32> = desired
            .into_iter()
            .map(|(a, w)| (a.into(), normalize_weight(w)))
            .collect();

        let mut summary = ReconcileSummary::default();
        let mut backends = self.write();

        backends.retain(|address, _| {
            let keep = desired.contains_key(address);
            if !keep {
                tracing::info!(address = %address, "Backend deregistered by reload");
                summary.removed += 1;
            }
            keep
        });

        for (address, weight) in desired {
            match backends.get(&address) {
                Some(existing) if existing.weight() == weight => summary.unchanged += 1,
                Some(_) => {
                    tracing::info!(address = %address, weight, "Backend weight changed by reload");
                    backends.insert(address.clone(), Arc::new(Backend::new(address, weight as i64)));
                    summary.updated += 1;
                }
                None => {
                    tracing::info!(address = %address, weight, "Backend registered by reload");
                    backends.insert(address.clone(), Arc::new(Backend::new(address, weight as i64)));
                    summary.added += 1;
                }
            }
        }

        summary
    }
}

impl BackendPool for BackendRegistry {
    fn healthy_snapshot(&self) -> Vec<BackendSnapshot> {
        self.read()
            .values()
            .filter(|b| b.is_healthy())
            .map(|b| b.snapshot())
            .collect()
    }

    fn total_weight(&self) -> u64 {
        self.read()
            .values()
            .filter(|b| b.is_healthy())
            .map(|b| b.weight() as u64)
            .sum()
    }

    fn increment_active(&self, address: &str) -> bool {
        // The read lock is released before touching the counter.
        match self.lookup(address) {
            Some(backend) => {
                backend.inc_connections();
                true
            }
            None => {
                tracing::debug!(address = %address, "Increment for unknown backend ignored");
                false
            }
        }
    }

    fn decrement_active(&self, address: &str) -> bool {
        match self.lookup(address) {
            Some(backend) => {
                backend.dec_connections();
                true
            }
            None => {
                tracing::debug!(address = %address, "Decrement for unknown backend ignored");
                false
            }
        }
    }
}

/// Outcome of [`BackendRegistry::reconcile`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}
