//! TTL cache for the most recent discovery batch of one source.

use crate::domain::DiscoveredService;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry {
    expires_at: Instant,
    batch: Vec<DiscoveredService>,
}

/// Keys must be stable across writes and reads (the source name in
/// practice); a key derived from the clock would make every write
/// unreachable on the next read.
#[derive(Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, batch: Vec<DiscoveredService>, ttl: Duration) {
        let mut entries = self.entries.lock().expect("result cache state");
        entries.insert(
            key.to_string(),
            CacheEntry {
                expires_at: Instant::now() + ttl,
                batch,
            },
        );
    }

    /// Expiry is lazy: an expired entry is evicted on the read that finds it.
    pub fn get(&self, key: &str) -> Option<Vec<DiscoveredService>> {
        let mut entries = self.entries.lock().expect("result cache state");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.batch.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self) {
        self.entries.lock().expect("result cache state").clear();
    }
}
