//! Client-side content cache.
//!
//! Queries are keyed per entity kind and audience. Reads serve the last value
//! immediately and revalidate in the background once it is stale; writes made
//! through the cache invalidate every query of the written kind.

mod config;
mod keys;
mod lock;
mod revisions;
mod source;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheKey, QueryScope};
pub use revisions::{RevisionTracker, Stamp};
pub use source::{ContentSource, FetchError, LocalSource};
pub use store::ContentCache;
