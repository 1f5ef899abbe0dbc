//! Cookie-based session affinity.
//!
//! # Responsibilities
//! - Map opaque client IDs (carried in a cookie) to backend addresses
//! - Reject entries whose TTL has passed at read time
//! - Sweep expired entries when asked (the server runs a periodic janitor)
//!
//! Entries name backends by address only; an address may disappear from the
//! registry at any time and lookups must tolerate that.
//!
//! Without the janitor the map only shrinks on overwrite, so an operator
//! running cookie mode should keep `sticky_sweep_secs` enabled.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::validation::MAX_DURATION_SECS;
use crate::observability::metrics;

/// Longest binding lifetime. Larger TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(MAX_DURATION_SECS);

/// A client → backend binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyEntry {
    pub backend: String,
    pub expires_at: Instant,
}

impl StickyEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Server-side sticky map with a fixed TTL.
#[derive(Debug)]
pub struct CookieAffinity {
    entries: DashMap<String, StickyEntry>,
    ttl: Duration,
}

impl CookieAffinity {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: ttl.min(MAX_TTL),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Backend bound to `client_id`, if the binding has not expired.
    pub fn lookup(&self, client_id: &str) -> Option<String> {
        self.lookup_at(client_id, Instant::now())
    }

    fn lookup_at(&self, client_id: &str, now: Instant) -> Option<String> {
        let entry = self.entries.get(client_id)?;
        if entry.is_expired(now) {
            tracing::debug!(client_id = %client_id, "Sticky entry expired");
            return None;
        }
        Some(entry.backend.clone())
    }

    /// Create a binding under a freshly generated client ID and return the ID.
    pub fn bind(&self, backend: &str) -> String {
        let client_id = generate_client_id();
        self.insert(client_id.clone(), backend.to_string());
        client_id
    }

    /// Insert or overwrite the binding for `client_id`.
    pub fn insert(&self, client_id: String, backend: String) {
        let entry = StickyEntry {
            backend,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(client_id, entry);
        metrics::record_sticky_entries(self.entries.len());
    }

    pub fn remove(&self, client_id: &str) -> bool {
        let removed = self.entries.remove(client_id).is_some();
        metrics::record_sticky_entries(self.entries.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    fn sweep_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        metrics::record_sticky_entries(self.entries.len());
        removed
    }
}

/// Opaque, unpredictable client identifier.
fn generate_client_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_lookup() {
        let affinity = CookieAffinity::new(Duration::from_secs(60));
        let id = affinity.bind("http://a");
        assert_eq!(affinity.lookup(&id).as_deref(), Some("http://a"));
        assert_eq!(affinity.lookup("unknown"), None);
    }

    #[test]
    fn test_client_ids_are_unique() {
        let affinity = CookieAffinity::new(Duration::from_secs(60));
        let a = affinity.bind("http://a");
        let b = affinity.bind("http://a");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_expired_entry_is_rejected() {
        let affinity = CookieAffinity::new(Duration::from_secs(60));
        let id = affinity.bind("http://a");
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(affinity.lookup_at(&id, later), None);
        // Still present until swept.
        assert_eq!(affinity.len(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let affinity = CookieAffinity::new(Duration::from_secs(60));
        affinity.insert("old".into(), "http://a".into());
        let later = Instant::now() + Duration::from_secs(30);
        assert_eq!(affinity.sweep_expired_at(later), 0);

        let much_later = Instant::now() + Duration::from_secs(120);
        assert_eq!(affinity.sweep_expired_at(much_later), 1);
        assert!(affinity.is_empty());
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let affinity = CookieAffinity::new(Duration::from_secs(u64::MAX));
        assert_eq!(affinity.ttl(), MAX_TTL);
        let id = affinity.bind("http://a");
        assert_eq!(affinity.lookup(&id).as_deref(), Some("http://a"));
    }

    #[test]
    fn test_remove() {
        let affinity = CookieAffinity::new(Duration::from_secs(60));
        let id = affinity.bind("http://a");
        assert!(affinity.remove(&id));
        assert!(!affinity.remove(&id));
        assert!(affinity.is_empty());
    }
}
