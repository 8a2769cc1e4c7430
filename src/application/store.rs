//! Typed entity store over a document backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::{RecordsRepo, RepoError};
use crate::domain::entity::merge_draft;
use crate::domain::error::DomainError;
use crate::domain::{Entity, EntityKind, ListFilter, Revision};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: Uuid },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A list read together with the kind's revision observed before reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<E> {
    pub items: Vec<E>,
    pub revision: Revision,
}

/// A committed write and the revision it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<E> {
    pub entity: E,
    pub revision: Revision,
}

/// Canonical owner of content state.
///
/// Writes for one kind are serialized through a per-kind lock so that a
/// read-modify-write never interleaves with another write of the same kind.
pub struct EntityStore {
    repo: Arc<dyn RecordsRepo>,
    revisions: [AtomicU64; 6],
    write_locks: [Mutex<()>; 6],
}

impl EntityStore {
    /// Open the store, loading persisted revision counters.
    pub async fn open(repo: Arc<dyn RecordsRepo>) -> Result<Self, StoreError> {
        let loaded = repo.load_revisions().await?;
        let revisions = std::array::from_fn(|_| AtomicU64::new(0));
        let store = Self {
            repo,
            revisions,
            write_locks: std::array::from_fn(|_| Mutex::new(())),
        };
        for (kind, revision) in loaded {
            store.observe_revision(kind, revision);
        }
        Ok(store)
    }

    pub fn revision(&self, kind: EntityKind) -> Revision {
        self.revisions[kind.index()].load(Ordering::SeqCst)
    }

    pub fn revisions(&self) -> BTreeMap<EntityKind, Revision> {
        EntityKind::ALL
            .into_iter()
            .map(|kind| (kind, self.revision(kind)))
            .collect()
    }

    pub async fn get<E: Entity>(&self, id: Uuid) -> Result<E, StoreError> {
        let value = self
            .repo
            .find(E::KIND, id)
            .await?
            .ok_or(StoreError::NotFound { kind: E::KIND, id })?;
        decode::<E>(id, value)
    }

    pub async fn list<E: Entity>(&self, filter: &ListFilter) -> Result<Listing<E>, StoreError> {
        // Read the revision first: a write racing the list can only make the
        // listing newer than its stamp, never older.
        let revision = self.revision(E::KIND);
        let documents = self.repo.list(E::KIND).await?;

        let mut items = Vec::with_capacity(documents.len());
        for document in documents {
            let entity: E = serde_json::from_value(document).map_err(|err| {
                RepoError::from_persistence(format!("{} document unreadable: {err}", E::KIND))
            })?;
            if entity.matches(filter) {
                items.push(entity);
            }
        }
        items.sort_by(E::compare);

        debug!(kind = %E::KIND, count = items.len(), revision, "entities listed");
        Ok(Listing { items, revision })
    }

    pub async fn create<E: Entity>(&self, draft: E::Draft) -> Result<Committed<E>, StoreError> {
        E::validate(&draft)?;

        let _guard = self.write_locks[E::KIND.index()].lock().await;
        let id = Uuid::new_v4();
        let entity = E::commit(id, draft, OffsetDateTime::now_utc());
        let body = encode(&entity)?;
        let revision = self.repo.insert(E::KIND, id, &body).await?;
        self.observe_revision(E::KIND, revision);

        info!(kind = %E::KIND, id = %id, revision, "entity created");
        Ok(Committed { entity, revision })
    }

    /// Full edit: replace every field with `draft`.
    pub async fn update<E: Entity>(
        &self,
        id: Uuid,
        draft: E::Draft,
    ) -> Result<Committed<E>, StoreError> {
        self.modify::<E, _>(id, move |current| {
            *current = draft;
            Ok(())
        })
        .await
    }

    /// Apply a JSON merge patch onto the current draft, then validate the result.
    pub async fn patch<E: Entity>(
        &self,
        id: Uuid,
        patch: &Value,
    ) -> Result<Committed<E>, StoreError> {
        self.modify::<E, _>(id, |current| {
            *current = merge_draft::<E>(current, patch)?;
            Ok(())
        })
        .await
    }

    /// Read-modify-write under the kind's write lock.
    ///
    /// Nothing is written when `change` or validation fails.
    pub async fn modify<E, F>(&self, id: Uuid, change: F) -> Result<Committed<E>, StoreError>
    where
        E: Entity,
        F: FnOnce(&mut E::Draft) -> Result<(), DomainError> + Send,
    {
        let _guard = self.write_locks[E::KIND.index()].lock().await;
        let current: E = self.get(id).await?;

        let mut draft = current.to_draft();
        change(&mut draft)?;
        E::validate(&draft)?;

        let entity = E::commit(id, draft, OffsetDateTime::now_utc());
        let body = encode(&entity)?;
        let revision = self
            .repo
            .replace(E::KIND, id, &body)
            .await?
            .ok_or(StoreError::NotFound { kind: E::KIND, id })?;
        self.observe_revision(E::KIND, revision);

        info!(kind = %E::KIND, id = %id, revision, "entity updated");
        Ok(Committed { entity, revision })
    }

    pub async fn delete<E: Entity>(&self, id: Uuid) -> Result<Revision, StoreError> {
        let _guard = self.write_locks[E::KIND.index()].lock().await;
        let revision = self
            .repo
            .remove(E::KIND, id)
            .await?
            .ok_or(StoreError::NotFound { kind: E::KIND, id })?;
        self.observe_revision(E::KIND, revision);

        info!(kind = %E::KIND, id = %id, revision, "entity deleted");
        Ok(revision)
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.repo.health_check().await.map_err(StoreError::from)
    }

    fn observe_revision(&self, kind: EntityKind, revision: Revision) {
        self.revisions[kind.index()].fetch_max(revision, Ordering::SeqCst);
    }
}

fn decode<E: Entity>(id: Uuid, value: Value) -> Result<E, StoreError> {
    serde_json::from_value(value).map_err(|err| {
        StoreError::Repo(RepoError::Corrupt {
            kind: E::KIND,
            id,
            message: err.to_string(),
        })
    })
}

fn encode<E: Entity>(entity: &E) -> Result<Value, StoreError> {
    serde_json::to_value(entity)
        .map_err(|err| StoreError::Domain(DomainError::invariant(format!("encode failed: {err}"))))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::{PortfolioItemRecord, ServiceDraft, ServiceRecord};
    use crate::infra::memory::InMemoryRepositories;

    async fn store() -> EntityStore {
        EntityStore::open(Arc::new(InMemoryRepositories::new()))
            .await
            .expect("open store")
    }

    fn lawn_mowing() -> ServiceDraft {
        ServiceDraft {
            name: "Lawn Mowing".to_string(),
            description: "Weekly cut and edge".to_string(),
            price: "$40".to_string(),
            image_url: None,
            rank: 1,
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_payload_with_id() {
        let store = store().await;
        let draft = lawn_mowing();

        let committed = store
            .create::<ServiceRecord>(draft.clone())
            .await
            .expect("create");
        let fetched: ServiceRecord = store.get(committed.entity.id).await.expect("get");

        assert_eq!(fetched, committed.entity);
        assert_eq!(fetched.to_draft(), draft);
        assert_eq!(committed.revision, 1);
        assert_eq!(store.revision(EntityKind::Service), 1);
    }

    #[tokio::test]
    async fn invalid_create_writes_nothing() {
        let store = store().await;
        let mut draft = lawn_mowing();
        draft.price.clear();

        let err = store
            .create::<ServiceRecord>(draft)
            .await
            .expect_err("validation");
        assert!(matches!(err, StoreError::Domain(DomainError::Validation { .. })));

        let listing = store
            .list::<ServiceRecord>(&ListFilter::default())
            .await
            .expect("list");
        assert!(listing.items.is_empty());
        assert_eq!(listing.revision, 0);
    }

    #[tokio::test]
    async fn invalid_update_keeps_prior_state() {
        let store = store().await;
        let created = store
            .create::<ServiceRecord>(lawn_mowing())
            .await
            .expect("create");

        let mut bad = lawn_mowing();
        bad.name = String::new();
        let err = store
            .update::<ServiceRecord>(created.entity.id, bad)
            .await
            .expect_err("validation");
        assert!(matches!(err, StoreError::Domain(_)));

        let current: ServiceRecord = store.get(created.entity.id).await.expect("get");
        assert_eq!(current, created.entity);
        assert_eq!(store.revision(EntityKind::Service), 1);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found_and_id_never_listed() {
        let store = store().await;
        let created = store
            .create::<ServiceRecord>(lawn_mowing())
            .await
            .expect("create");
        let id = created.entity.id;

        let revision = store.delete::<ServiceRecord>(id).await.expect("delete");
        assert_eq!(revision, 2);

        let err = store.get::<ServiceRecord>(id).await.expect_err("gone");
        assert!(matches!(err, StoreError::NotFound { id: missing, .. } if missing == id));

        store
            .create::<ServiceRecord>(lawn_mowing())
            .await
            .expect("create again");
        let listing = store
            .list::<ServiceRecord>(&ListFilter::default())
            .await
            .expect("list");
        assert!(listing.items.iter().all(|s| s.id != id));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found_without_revision_bump() {
        let store = store().await;
        let err = store
            .delete::<PortfolioItemRecord>(Uuid::new_v4())
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { kind: EntityKind::PortfolioItem, .. }));
        assert_eq!(store.revision(EntityKind::PortfolioItem), 0);
    }

    #[tokio::test]
    async fn patch_merges_onto_current_draft() {
        let store = store().await;
        let created = store
            .create::<ServiceRecord>(lawn_mowing())
            .await
            .expect("create");

        let patched = store
            .patch::<ServiceRecord>(created.entity.id, &json!({"price": "$45"}))
            .await
            .expect("patch");
        assert_eq!(patched.entity.price, "$45");
        assert_eq!(patched.entity.name, "Lawn Mowing");

        let err = store
            .patch::<ServiceRecord>(created.entity.id, &json!({"rank": "first"}))
            .await
            .expect_err("bad patch");
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::Validation { field, .. }) if field == "patch"
        ));
    }

    #[tokio::test]
    async fn revisions_survive_reopen() {
        let repo = Arc::new(InMemoryRepositories::new());
        let first = EntityStore::open(repo.clone()).await.expect("open");
        first
            .create::<ServiceRecord>(lawn_mowing())
            .await
            .expect("create");
        first
            .create::<ServiceRecord>(lawn_mowing())
            .await
            .expect("create");

        let reopened = EntityStore::open(repo).await.expect("reopen");
        assert_eq!(reopened.revision(EntityKind::Service), 2);
        assert_eq!(reopened.revision(EntityKind::Testimonial), 0);
    }

    #[tokio::test]
    async fn concurrent_modifications_do_not_lose_writes() {
        let store = Arc::new(store().await);
        let created = store
            .create::<ServiceRecord>(lawn_mowing())
            .await
            .expect("create");
        let id = created.entity.id;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .modify::<ServiceRecord, _>(id, |draft| {
                        draft.rank += 1;
                        Ok(())
                    })
                    .await
                    .expect("modify");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        let current: ServiceRecord = store.get(id).await.expect("get");
        assert_eq!(current.rank, 11);
        assert_eq!(store.revision(EntityKind::Service), 11);
    }
}
