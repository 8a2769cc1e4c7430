//! In-process document backend used when no database is configured.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::application::repos::{RecordsRepo, RepoError};
use crate::domain::{EntityKind, Revision};

#[derive(Default)]
struct KindTable {
    rows: HashMap<Uuid, Value>,
    /// Ids that were deleted; never handed back out.
    tombstones: HashSet<Uuid>,
    revision: Revision,
}

#[derive(Default)]
pub struct InMemoryRepositories {
    tables: RwLock<HashMap<EntityKind, KindTable>>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordsRepo for InMemoryRepositories {
    async fn load_revisions(&self) -> Result<HashMap<EntityKind, Revision>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .iter()
            .map(|(kind, table)| (*kind, table.revision))
            .collect())
    }

    async fn find(&self, kind: EntityKind, id: Uuid) -> Result<Option<Value>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&kind).and_then(|table| table.rows.get(&id).cloned()))
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&kind)
            .map(|table| table.rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(
        &self,
        kind: EntityKind,
        id: Uuid,
        body: &Value,
    ) -> Result<Revision, RepoError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(kind).or_default();
        if table.rows.contains_key(&id) || table.tombstones.contains(&id) {
            return Err(RepoError::Duplicate { kind, id });
        }
        table.rows.insert(id, body.clone());
        table.revision += 1;
        Ok(table.revision)
    }

    async fn replace(
        &self,
        kind: EntityKind,
        id: Uuid,
        body: &Value,
    ) -> Result<Option<Revision>, RepoError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&kind) else {
            return Ok(None);
        };
        let Some(slot) = table.rows.get_mut(&id) else {
            return Ok(None);
        };
        *slot = body.clone();
        table.revision += 1;
        Ok(Some(table.revision))
    }

    async fn remove(&self, kind: EntityKind, id: Uuid) -> Result<Option<Revision>, RepoError> {
        let mut tables = self.tables.write().await;
        let Some(table) = tables.get_mut(&kind) else {
            return Ok(None);
        };
        if table.rows.remove(&id).is_none() {
            return Ok(None);
        }
        table.tombstones.insert(id);
        table.revision += 1;
        Ok(Some(table.revision))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn deleted_ids_are_never_reinserted() {
        let repo = InMemoryRepositories::new();
        let id = Uuid::new_v4();
        repo.insert(EntityKind::Service, id, &json!({"id": id}))
            .await
            .expect("insert");
        assert_eq!(
            repo.remove(EntityKind::Service, id).await.expect("remove"),
            Some(2)
        );

        let err = repo
            .insert(EntityKind::Service, id, &json!({"id": id}))
            .await
            .expect_err("tombstoned");
        assert!(matches!(err, RepoError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn revisions_are_per_kind() {
        let repo = InMemoryRepositories::new();
        repo.insert(EntityKind::Inquiry, Uuid::new_v4(), &json!({}))
            .await
            .expect("insert");
        repo.insert(EntityKind::Inquiry, Uuid::new_v4(), &json!({}))
            .await
            .expect("insert");
        repo.insert(EntityKind::BlogPost, Uuid::new_v4(), &json!({}))
            .await
            .expect("insert");

        let revisions = repo.load_revisions().await.expect("revisions");
        assert_eq!(revisions.get(&EntityKind::Inquiry), Some(&2));
        assert_eq!(revisions.get(&EntityKind::BlogPost), Some(&1));
        assert_eq!(revisions.get(&EntityKind::Service), None);
    }

    #[tokio::test]
    async fn replace_and_remove_of_unknown_ids_report_none() {
        let repo = InMemoryRepositories::new();
        let id = Uuid::new_v4();
        assert_eq!(
            repo.replace(EntityKind::Testimonial, id, &json!({}))
                .await
                .expect("replace"),
            None
        );
        assert_eq!(
            repo.remove(EntityKind::Testimonial, id)
                .await
                .expect("remove"),
            None
        );
        assert!(repo.load_revisions().await.expect("revisions").is_empty());
    }
}
