//! Content API service: authorization, delegation to the store and invalidation fan-out.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use verdant_api_types::DashboardSummary;

use crate::application::sessions::{
    AdminSessionGuard, AuthError, Credentials, Operation, SessionToken,
};
use crate::application::store::{Committed, EntityStore, Listing, StoreError};
use crate::domain::error::DomainError;
use crate::domain::{
    AppointmentRecord, AppointmentStatus, BlogPostRecord, Entity, EntityKind, InquiryRecord,
    ListFilter, PublishStatus, Revision,
};

/// Who a read is for. Public reads never need a session; admin reads always do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Public,
    Admin,
}

impl Display for Audience {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::Public => f.write_str("public"),
            Audience::Admin => f.write_str("admin"),
        }
    }
}

/// Receives `(kind, revision)` after each committed mutation.
pub trait InvalidationSink: Send + Sync {
    fn invalidated(&self, kind: EntityKind, revision: Revision);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("{field}: {reason}")]
    Validation { field: String, reason: String },
    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: Uuid },
    #[error("unauthorized")]
    Unauthorized,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("too many failed logins; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("store failure: {0}")]
    StoreFailure(String),
}

impl From<StoreError> for ContentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => ContentError::NotFound { kind, id },
            StoreError::Domain(DomainError::Validation { field, reason }) => {
                ContentError::Validation { field, reason }
            }
            other => ContentError::StoreFailure(other.to_string()),
        }
    }
}

impl From<AuthError> for ContentError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized => ContentError::Unauthorized,
            AuthError::SessionExpired => ContentError::SessionExpired,
            AuthError::InvalidCredentials => ContentError::InvalidCredentials,
            AuthError::RateLimited { retry_after_secs } => {
                ContentError::RateLimited { retry_after_secs }
            }
        }
    }
}

#[derive(Clone)]
pub struct ContentService {
    store: Arc<EntityStore>,
    guard: AdminSessionGuard,
    sinks: Arc<RwLock<Vec<Arc<dyn InvalidationSink>>>>,
}

impl ContentService {
    pub fn new(store: Arc<EntityStore>, guard: AdminSessionGuard) -> Self {
        Self {
            store,
            guard,
            sinks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn guard(&self) -> &AdminSessionGuard {
        &self.guard
    }

    /// Register a sink notified after every successful mutation.
    pub fn subscribe(&self, sink: Arc<dyn InvalidationSink>) {
        let mut sinks = match self.sinks.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sinks.push(sink);
    }

    pub fn login(&self, credentials: &Credentials) -> Result<SessionToken, ContentError> {
        self.guard.authenticate(credentials).map_err(Into::into)
    }

    pub fn logout(&self, token: Option<&str>) {
        if let Some(token) = token {
            self.guard.revoke(token);
        }
    }

    pub async fn list<E: Entity>(
        &self,
        audience: Audience,
        token: Option<&str>,
        filter: &ListFilter,
    ) -> Result<Listing<E>, ContentError> {
        self.admit(audience, token, Operation::Read(E::KIND))?;
        let mut listing = self.store.list::<E>(filter).await?;
        if audience == Audience::Public {
            listing.items.retain(E::is_public);
        }
        Ok(listing)
    }

    pub async fn get<E: Entity>(
        &self,
        audience: Audience,
        token: Option<&str>,
        id: Uuid,
    ) -> Result<E, ContentError> {
        self.admit(audience, token, Operation::Read(E::KIND))?;
        let entity: E = self.store.get(id).await?;
        if audience == Audience::Public && !entity.is_public() {
            // Unpublished drafts look the same as missing records to the public.
            return Err(ContentError::NotFound { kind: E::KIND, id });
        }
        Ok(entity)
    }

    pub async fn create<E: Entity>(
        &self,
        token: Option<&str>,
        draft: E::Draft,
    ) -> Result<Committed<E>, ContentError> {
        self.guard.authorize(token, Operation::Write(E::KIND))?;
        let committed = self.store.create::<E>(draft).await?;
        self.notify(E::KIND, committed.revision);
        Ok(committed)
    }

    pub async fn update<E: Entity>(
        &self,
        token: Option<&str>,
        id: Uuid,
        draft: E::Draft,
    ) -> Result<Committed<E>, ContentError> {
        self.guard.authorize(token, Operation::Write(E::KIND))?;
        let committed = self.store.update::<E>(id, draft).await?;
        self.notify(E::KIND, committed.revision);
        Ok(committed)
    }

    pub async fn patch<E: Entity>(
        &self,
        token: Option<&str>,
        id: Uuid,
        patch: &Value,
    ) -> Result<Committed<E>, ContentError> {
        self.guard.authorize(token, Operation::Write(E::KIND))?;
        let committed = self.store.patch::<E>(id, patch).await?;
        self.notify(E::KIND, committed.revision);
        Ok(committed)
    }

    pub async fn delete<E: Entity>(
        &self,
        token: Option<&str>,
        id: Uuid,
    ) -> Result<Revision, ContentError> {
        self.guard.authorize(token, Operation::Write(E::KIND))?;
        let revision = self.store.delete::<E>(id).await?;
        self.notify(E::KIND, revision);
        Ok(revision)
    }

    pub async fn set_appointment_status(
        &self,
        token: Option<&str>,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Committed<AppointmentRecord>, ContentError> {
        self.guard
            .authorize(token, Operation::Write(EntityKind::Appointment))?;
        let committed = self
            .store
            .modify::<AppointmentRecord, _>(id, |draft| {
                draft.status = status;
                Ok(())
            })
            .await?;
        self.notify(EntityKind::Appointment, committed.revision);
        Ok(committed)
    }

    pub async fn set_post_status(
        &self,
        token: Option<&str>,
        id: Uuid,
        status: PublishStatus,
    ) -> Result<Committed<BlogPostRecord>, ContentError> {
        self.guard
            .authorize(token, Operation::Write(EntityKind::BlogPost))?;
        let committed = self
            .store
            .modify::<BlogPostRecord, _>(id, |draft| {
                draft.status = status;
                Ok(())
            })
            .await?;
        self.notify(EntityKind::BlogPost, committed.revision);
        Ok(committed)
    }

    /// Counts computed from the store on every call.
    pub async fn dashboard(&self, token: Option<&str>) -> Result<DashboardSummary, ContentError> {
        self.guard.authorize(token, Operation::Dashboard)?;
        let pending = self
            .store
            .list::<AppointmentRecord>(&ListFilter::with_status(AppointmentStatus::Pending))
            .await?;
        let unread = self
            .store
            .list::<InquiryRecord>(&ListFilter::with_unread(true))
            .await?;
        Ok(DashboardSummary {
            pending_appointments: pending.items.len() as u64,
            unread_inquiries: unread.items.len() as u64,
        })
    }

    pub fn revisions(
        &self,
        token: Option<&str>,
    ) -> Result<BTreeMap<EntityKind, Revision>, ContentError> {
        self.guard.authorize(token, Operation::Revisions)?;
        Ok(self.store.revisions())
    }

    pub async fn health(&self) -> Result<(), ContentError> {
        self.store.health_check().await.map_err(Into::into)
    }

    fn admit(
        &self,
        audience: Audience,
        token: Option<&str>,
        operation: Operation,
    ) -> Result<(), ContentError> {
        match (audience, operation) {
            (Audience::Public, Operation::Read(kind)) if kind.is_public() => Ok(()),
            (Audience::Public, _) => {
                debug!(%operation, "public caller refused admin-only read");
                Err(ContentError::Unauthorized)
            }
            (Audience::Admin, _) => self
                .guard
                .authorize(token, operation)
                .map(|_| ())
                .map_err(Into::into),
        }
    }

    fn notify(&self, kind: EntityKind, revision: Revision) {
        let sinks = match self.sinks.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("invalidation sink list poisoned; recovering");
                poisoned.into_inner()
            }
        };
        debug!(%kind, revision, sinks = sinks.len(), "broadcasting invalidation");
        for sink in sinks.iter() {
            sink.invalidated(kind, revision);
        }
    }
}
