//! Repository traits describing persistence adapters.
//!
//! Backends store each record as a JSON document addressed by `(kind, id)` and
//! keep one revision counter per kind. Typing, validation and ordering happen
//! above this seam in [`crate::application::store::EntityStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{EntityKind, Revision};

#[derive(Debug, Clone, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("record `{kind}/{id}` already exists or was deleted")]
    Duplicate { kind: EntityKind, id: Uuid },
    #[error("stored document for `{kind}/{id}` is unreadable: {message}")]
    Corrupt {
        kind: EntityKind,
        id: Uuid,
        message: String,
    },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait RecordsRepo: Send + Sync {
    /// Current revision for every kind that has seen a write.
    async fn load_revisions(&self) -> Result<HashMap<EntityKind, Revision>, RepoError>;

    async fn find(&self, kind: EntityKind, id: Uuid) -> Result<Option<Value>, RepoError>;

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, RepoError>;

    /// Insert a new document and bump the kind's revision atomically.
    ///
    /// Ids that were ever deleted are refused with [`RepoError::Duplicate`].
    async fn insert(&self, kind: EntityKind, id: Uuid, body: &Value)
    -> Result<Revision, RepoError>;

    /// Replace an existing document. Returns `None` when the id is unknown.
    async fn replace(
        &self,
        kind: EntityKind,
        id: Uuid,
        body: &Value,
    ) -> Result<Option<Revision>, RepoError>;

    /// Remove a document. Returns `None` when the id is unknown.
    async fn remove(&self, kind: EntityKind, id: Uuid) -> Result<Option<Revision>, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}
