//! Content-addressed memo of decomposition results.
//!
//! Keys are the SHA-256 of the normalized (trimmed, lowercased) task
//! description, so two tasks worded identically up to case and surrounding
//! whitespace share one decomposition. A hit skips the decomposition call but
//! the cached plan is still validated by the next stage.
//!
//! Entries are never evicted or expired within a process.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::task::StageOutput;

/// Hex-encoded SHA-256 of a normalized description.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptionKey(String);

impl DescriptionKey {
    pub fn from_description(description: &str) -> Self {
        let normalized = description.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared decomposition cache.
#[derive(Debug, Default)]
pub struct DecompositionCache {
    entries: RwLock<HashMap<DescriptionKey, StageOutput>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DecompositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached decomposition for a description, if any.
    pub fn get(&self, description: &str) -> Option<StageOutput> {
        let key = DescriptionKey::from_description(description);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&key) {
            Some(output) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(output.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a decomposition. The first write for a key wins; later writes
    /// for the same key are no-ops. Returns whether the entry was inserted.
    pub fn put(&self, description: &str, output: StageOutput) -> bool {
        let key = DescriptionKey::from_description(description);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            debug!(key = %key.as_str(), "Decomposition already cached");
            return false;
        }
        entries.insert(key, output);
        true
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Stage;

    fn plan(content: &str) -> StageOutput {
        StageOutput::new(Stage::Decomposition, content)
    }

    #[test]
    fn test_key_normalizes_case_and_whitespace() {
        let a = DescriptionKey::from_description("  Build a Todo API \n");
        let b = DescriptionKey::from_description("build a todo api");
        let c = DescriptionKey::from_description("build a todo app");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_get_after_put_returns_cached_value() {
        let cache = DecompositionCache::new();
        assert!(cache.get("Build a todo API").is_none());

        assert!(cache.put("Build a todo API", plan("1. models\n2. routes")));
        let cached = cache.get("build a todo api  ").unwrap();

        assert_eq!(cached.content, "1. models\n2. routes");
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_repeated_put_keeps_first_value() {
        let cache = DecompositionCache::new();
        assert!(cache.put("task", plan("first")));
        assert!(!cache.put("TASK", plan("second")));

        assert_eq!(cache.get("task").unwrap().content, "first");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_puts_are_idempotent() {
        let cache = std::sync::Arc::new(DecompositionCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.put("same task", plan("same plan")))
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(cache.get("same task").unwrap().content, "same plan");
    }
}
