//! Client cache tuning.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_STALE_AFTER_MS: u64 = 30_000;
const DEFAULT_MAX_ENTRIES: usize = 256;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age after which a cached value is served but refetched in the background.
    pub stale_after: Duration,
    /// Maximum number of cached queries before LRU eviction.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_millis(DEFAULT_STALE_AFTER_MS),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            stale_after: Duration::from_millis(settings.stale_after_ms),
            max_entries: settings.max_entries,
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
