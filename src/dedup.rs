// src/dedup.rs
// Exact-match dedup over content hashes. The store only checks-and-inserts;
// callers compute hashes from normalized text. Near-duplicate detection is
// deliberately out of scope.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::signal::normalize_text;

/// SHA-256 hex digest of the case-folded, whitespace-collapsed content.
pub fn content_hash(content: &str) -> String {
    let normalized = normalize_text(content).to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

/// Admission filter shared by all runs. `admit` must be atomic: two
/// concurrent calls with the same hash yield exactly one `Accepted`.
pub trait DedupStore: Send + Sync {
    fn admit(&self, hash: &str) -> Admission;
    /// Forget a hash so the same content can be admitted again.
    fn revoke(&self, hash: &str);
    fn contains(&self, hash: &str) -> bool;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store: append-only map of hash -> first_seen_at, check-and-insert
/// under one mutex.
#[derive(Debug, Default)]
pub struct MemoryDedup {
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryDedup {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupStore for MemoryDedup {
    fn admit(&self, hash: &str) -> Admission {
        let mut seen = self.seen.lock().expect("dedup mutex poisoned");
        if seen.contains_key(hash) {
            return Admission::Duplicate;
        }
        seen.insert(hash.to_string(), Utc::now());
        Admission::Accepted
    }

    fn revoke(&self, hash: &str) {
        let mut seen = self.seen.lock().expect("dedup mutex poisoned");
        seen.remove(hash);
    }

    fn contains(&self, hash: &str) -> bool {
        self.seen.lock().expect("dedup mutex poisoned").contains_key(hash)
    }

    fn len(&self) -> usize {
        self.seen.lock().expect("dedup mutex poisoned").len()
    }
}
