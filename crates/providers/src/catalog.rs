//! Per-client model catalogue cache.
//!
//! Invariant: the cache is either unset, or non-empty and non-expired when
//! served. Empty fetch results are never cached.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Model listings stay fresh this long by default.
pub const MODEL_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

struct Entry {
    models: Vec<String>,
    fetched_at: Instant,
}

/// TTL cache for one client's model listing.
pub(crate) struct CatalogCache {
    ttl: Duration,
    entry: Mutex<Option<Entry>>,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// The cached listing, if present and unexpired.
    pub fn get(&self) -> Option<Vec<String>> {
        let entry = self.entry.lock();
        entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.models.clone())
    }

    /// Replace the cache. Empty listings are dropped rather than cached.
    pub fn store(&self, models: &[String]) {
        let mut entry = self.entry.lock();
        if models.is_empty() {
            *entry = None;
        } else {
            *entry = Some(Entry {
                models: models.to_vec(),
                fetched_at: Instant::now(),
            });
        }
    }

    pub fn clear(&self) {
        *self.entry.lock() = None;
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(MODEL_CACHE_TTL)
    }
}
