//! Postgres-backed document repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Postgres, Row, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};
use uuid::Uuid;

use crate::application::repos::{RecordsRepo, RepoError};
use crate::domain::{EntityKind, Revision};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    /// Bump the kind's revision inside `tx`. The upsert row lock also
    /// serializes concurrent writers of the same kind.
    async fn bump_revision(
        tx: &mut Transaction<'_, Postgres>,
        kind: EntityKind,
    ) -> Result<Revision, RepoError> {
        let row = query(
            r#"
            INSERT INTO entity_revisions (kind, revision)
            VALUES ($1, 1)
            ON CONFLICT (kind) DO UPDATE SET revision = entity_revisions.revision + 1
            RETURNING revision
            "#,
        )
        .bind(kind.as_str())
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        convert_revision(row.try_get("revision").map_err(map_sqlx_error)?)
    }
}

#[async_trait]
impl RecordsRepo for PostgresRepositories {
    async fn load_revisions(&self) -> Result<HashMap<EntityKind, Revision>, RepoError> {
        let rows = query("SELECT kind, revision FROM entity_revisions")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let mut revisions = HashMap::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind").map_err(map_sqlx_error)?;
            let revision: i64 = row.try_get("revision").map_err(map_sqlx_error)?;
            let Ok(kind) = kind.parse::<EntityKind>() else {
                tracing::warn!(kind = %kind, "ignoring revision row for unknown kind");
                continue;
            };
            revisions.insert(kind, convert_revision(revision)?);
        }
        Ok(revisions)
    }

    async fn find(&self, kind: EntityKind, id: Uuid) -> Result<Option<Value>, RepoError> {
        let row = query("SELECT body FROM entities WHERE kind = $1 AND id = $2 AND body IS NOT NULL")
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| row.try_get::<Value, _>("body").map_err(map_sqlx_error))
            .transpose()
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Value>, RepoError> {
        let rows = query("SELECT body FROM entities WHERE kind = $1 AND body IS NOT NULL")
            .bind(kind.as_str())
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| row.try_get::<Value, _>("body").map_err(map_sqlx_error))
            .collect()
    }

    async fn insert(
        &self,
        kind: EntityKind,
        id: Uuid,
        body: &Value,
    ) -> Result<Revision, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let inserted = query(
            r#"
            INSERT INTO entities (kind, id, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind, id) DO NOTHING
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(body)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if inserted.rows_affected() == 0 {
            return Err(RepoError::Duplicate { kind, id });
        }

        let revision = Self::bump_revision(&mut tx, kind).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(revision)
    }

    async fn replace(
        &self,
        kind: EntityKind,
        id: Uuid,
        body: &Value,
    ) -> Result<Option<Revision>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let updated = query(
            r#"
            UPDATE entities
            SET body = $3, updated_at = now()
            WHERE kind = $1 AND id = $2 AND body IS NOT NULL
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(body)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let revision = Self::bump_revision(&mut tx, kind).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(revision))
    }

    async fn remove(&self, kind: EntityKind, id: Uuid) -> Result<Option<Revision>, RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        let removed = query(
            r#"
            UPDATE entities
            SET body = NULL, deleted_at = now(), updated_at = now()
            WHERE kind = $1 AND id = $2 AND body IS NOT NULL
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if removed.rows_affected() == 0 {
            return Ok(None);
        }

        let revision = Self::bump_revision(&mut tx, kind).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(revision))
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        other => RepoError::from_persistence(other),
    }
}

fn convert_revision(value: i64) -> Result<Revision, RepoError> {
    value
        .try_into()
        .map_err(|_| RepoError::from_persistence("revision exceeds supported range"))
}
