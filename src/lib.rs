//! Content layer for a gardening-services site.
//!
//! - [`domain`]: the six content kinds and their invariants.
//! - [`application`]: the entity store, admin sessions and the content service.
//! - [`infra`]: persistence backends, the axum HTTP surface and telemetry.
//! - [`cache`]: the stale-while-revalidate client cache.
//! - [`client`]: an HTTP [`cache::ContentSource`] for remote servers.

pub mod application;
pub mod cache;
pub mod client;
pub mod config;
pub mod domain;
pub mod infra;
