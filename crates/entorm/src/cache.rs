//! Bounded, expiring read cache of persisted instances.
//!
//! Keys are reference strings; entries hold clean clones taken after a
//! load or save. Entries expire after a fixed TTL, and when the cache is
//! full the oldest entry makes room. The cache lives inside the
//! registry's connection lock, so it needs no locking of its own.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::entity::Entity;

struct CacheEntry {
    entity: Entity,
    inserted: Instant,
}

pub(crate) struct ReadCache {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl ReadCache {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Clone of the cached instance, unless absent or expired.
    pub(crate) fn get(&mut self, reference: &str) -> Option<Entity> {
        if let Some(entry) = self.entries.get(reference) {
            if entry.inserted.elapsed() > self.ttl {
                self.entries.remove(reference);
                return None;
            }
            return Some(entry.entity.clone());
        }
        None
    }

    /// Store a clean clone, evicting the oldest entry if at capacity.
    pub(crate) fn put(&mut self, entity: Entity) {
        if self.capacity == 0 {
            return;
        }
        let reference = entity.reference().to_string();
        if !self.entries.contains_key(&reference) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            reference,
            CacheEntry {
                entity,
                inserted: Instant::now(),
            },
        );
    }

    pub(crate) fn evict(&mut self, reference: &str) {
        self.entries.remove(reference);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
