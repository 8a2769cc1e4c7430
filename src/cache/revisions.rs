//! Per-kind freshness bookkeeping.
//!
//! Two counters per kind decide whether a cached entry is stale:
//!
//! - the **local stamp**, bumped synchronously by [`RevisionTracker::invalidate`]
//!   whenever this process knows a kind changed;
//! - the **known store revision**, the highest server revision observed for
//!   the kind in any response.
//!
//! An entry records both as they were when its fetch *started*. It is stale
//! once either counter has moved past the recorded value.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::{EntityKind, Revision};

/// Monotonic per-kind invalidation counter local to one cache instance.
pub type Stamp = u64;

#[derive(Debug, Default)]
pub struct RevisionTracker {
    stamps: [AtomicU64; 6],
    known: [AtomicU64; 6],
}

impl RevisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every cached query of `kind` stale. Returns the new stamp.
    pub fn invalidate(&self, kind: EntityKind) -> Stamp {
        self.stamps[kind.index()].fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn stamp(&self, kind: EntityKind) -> Stamp {
        self.stamps[kind.index()].load(Ordering::SeqCst)
    }

    /// Record a store revision seen in a response. Returns true when it is newer
    /// than anything seen before.
    pub fn observe(&self, kind: EntityKind, revision: Revision) -> bool {
        self.known[kind.index()].fetch_max(revision, Ordering::SeqCst) < revision
    }

    pub fn known(&self, kind: EntityKind) -> Revision {
        self.known[kind.index()].load(Ordering::SeqCst)
    }

    /// Forget everything. Used when the cache is cleared.
    pub fn reset(&self) {
        for kind in EntityKind::ALL {
            // Stamps only move forward so in-flight fetches from before the
            // reset still land stale.
            self.stamps[kind.index()].fetch_add(1, Ordering::SeqCst);
            self.known[kind.index()].store(0, Ordering::SeqCst);
        }
    }
}
