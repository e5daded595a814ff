//! Response cache for external inference calls.
//!
//! Keyed by `SHA-256(model ∥ prompt)` with LRU eviction plus a TTL, so a
//! burst of identical documents (re-scans, photo bursts) costs one external
//! call instead of N.

use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::l2::L2Decision;

/// TTL-bounded LRU over L2 decisions.
pub struct ResponseCache {
    inner: LruCache<String, (i64, L2Decision)>,
    ttl_ms: i64,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl_s: u64) -> Self {
        Self {
            inner: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)),
            ttl_ms: (ttl_s as i64) * 1_000,
        }
    }

    /// Cache key for one call.
    pub fn key(model: &str, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0x1f]);
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&mut self, key: &str, now_ms: i64) -> Option<L2Decision> {
        match self.inner.get(key) {
            Some((stored_at, decision)) if now_ms - stored_at <= self.ttl_ms => {
                Some(decision.clone())
            }
            Some(_) => {
                self.inner.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&mut self, key: String, decision: L2Decision, now_ms: i64) {
        self.inner.put(key, (now_ms, decision));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
