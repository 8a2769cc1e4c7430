//! Where the cache gets its data from.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use verdant_api_types::{DashboardSummary, error_kinds};

use crate::application::content::{Audience, ContentError, ContentService};
use crate::application::store::{Committed, Listing};
use crate::domain::{
    AppointmentRecord, AppointmentStatus, BlogPostRecord, Entity, EntityKind, ListFilter,
    PublishStatus, Revision,
};

/// Failure reported by a [`ContentSource`].
///
/// Cloneable so one failed fetch can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The content API answered with an error body.
    #[error("{kind}: {reason}")]
    Api {
        status: u16,
        kind: String,
        field: Option<String>,
        reason: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response could not be decoded: {0}")]
    Decode(String),
    /// The fetch task ended without producing a result.
    #[error("fetch aborted")]
    Aborted,
}

impl FetchError {
    pub fn kind(&self) -> Option<&str> {
        match self {
            FetchError::Api { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.kind(),
            Some(error_kinds::UNAUTHORIZED | error_kinds::SESSION_EXPIRED)
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(error_kinds::NOT_FOUND)
    }

    /// Worth one more try: the request may not have reached the server or the
    /// server failed transiently.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Api { status, .. } => *status >= 500,
            FetchError::Decode(_) | FetchError::Aborted => false,
        }
    }
}

impl From<ContentError> for FetchError {
    fn from(err: ContentError) -> Self {
        let (status, kind, field) = match &err {
            ContentError::Validation { field, .. } => {
                (400, error_kinds::VALIDATION, Some(field.clone()))
            }
            ContentError::NotFound { .. } => (404, error_kinds::NOT_FOUND, None),
            ContentError::Unauthorized => (401, error_kinds::UNAUTHORIZED, None),
            ContentError::SessionExpired => (401, error_kinds::SESSION_EXPIRED, None),
            ContentError::InvalidCredentials => (401, error_kinds::INVALID_CREDENTIALS, None),
            ContentError::RateLimited { .. } => (429, error_kinds::RATE_LIMITED, None),
            ContentError::StoreFailure(_) => (500, error_kinds::STORE_FAILURE, None),
        };
        let reason = match err {
            ContentError::Validation { reason, .. } => reason,
            other => other.to_string(),
        };
        FetchError::Api {
            status,
            kind: kind.to_string(),
            field,
            reason,
        }
    }
}

/// Reads and writes content on behalf of the cache.
#[async_trait]
pub trait ContentSource: Send + Sync + 'static {
    async fn list<E: Entity>(
        &self,
        audience: Audience,
        filter: &ListFilter,
    ) -> Result<Listing<E>, FetchError>;

    async fn get<E: Entity>(&self, audience: Audience, id: Uuid) -> Result<E, FetchError>;

    async fn create<E: Entity>(&self, draft: E::Draft) -> Result<Committed<E>, FetchError>;

    async fn update<E: Entity>(
        &self,
        id: Uuid,
        draft: E::Draft,
    ) -> Result<Committed<E>, FetchError>;

    async fn patch<E: Entity>(&self, id: Uuid, patch: &Value)
    -> Result<Committed<E>, FetchError>;

    async fn delete<E: Entity>(&self, id: Uuid) -> Result<Revision, FetchError>;

    async fn set_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Committed<AppointmentRecord>, FetchError>;

    async fn set_post_status(
        &self,
        id: Uuid,
        status: PublishStatus,
    ) -> Result<Committed<BlogPostRecord>, FetchError>;

    async fn dashboard(&self) -> Result<DashboardSummary, FetchError>;

    /// Current store revision for `kind`, when the source can tell cheaply.
    fn latest_revision(&self, _kind: EntityKind) -> Option<Revision> {
        None
    }
}

/// In-process source backed directly by a [`ContentService`].
pub struct LocalSource {
    content: ContentService,
    token: RwLock<Option<String>>,
}

impl LocalSource {
    pub fn new(content: ContentService) -> Self {
        Self {
            content,
            token: RwLock::new(None),
        }
    }

    pub fn with_token(content: ContentService, token: impl Into<String>) -> Self {
        Self {
            content,
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        let mut slot = self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = token;
    }

    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ContentSource for LocalSource {
    async fn list<E: Entity>(
        &self,
        audience: Audience,
        filter: &ListFilter,
    ) -> Result<Listing<E>, FetchError> {
        let token = self.token();
        Ok(self
            .content
            .list::<E>(audience, token.as_deref(), filter)
            .await?)
    }

    async fn get<E: Entity>(&self, audience: Audience, id: Uuid) -> Result<E, FetchError> {
        let token = self.token();
        Ok(self.content.get::<E>(audience, token.as_deref(), id).await?)
    }

    async fn create<E: Entity>(&self, draft: E::Draft) -> Result<Committed<E>, FetchError> {
        let token = self.token();
        Ok(self.content.create::<E>(token.as_deref(), draft).await?)
    }

    async fn update<E: Entity>(
        &self,
        id: Uuid,
        draft: E::Draft,
    ) -> Result<Committed<E>, FetchError> {
        let token = self.token();
        Ok(self.content.update::<E>(token.as_deref(), id, draft).await?)
    }

    async fn patch<E: Entity>(
        &self,
        id: Uuid,
        patch: &Value,
    ) -> Result<Committed<E>, FetchError> {
        let token = self.token();
        Ok(self.content.patch::<E>(token.as_deref(), id, patch).await?)
    }

    async fn delete<E: Entity>(&self, id: Uuid) -> Result<Revision, FetchError> {
        let token = self.token();
        Ok(self.content.delete::<E>(token.as_deref(), id).await?)
    }

    async fn set_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Committed<AppointmentRecord>, FetchError> {
        let token = self.token();
        Ok(self
            .content
            .set_appointment_status(token.as_deref(), id, status)
            .await?)
    }

    async fn set_post_status(
        &self,
        id: Uuid,
        status: PublishStatus,
    ) -> Result<Committed<BlogPostRecord>, FetchError> {
        let token = self.token();
        Ok(self
            .content
            .set_post_status(token.as_deref(), id, status)
            .await?)
    }

    async fn dashboard(&self) -> Result<DashboardSummary, FetchError> {
        let token = self.token();
        Ok(self.content.dashboard(token.as_deref()).await?)
    }

    fn latest_revision(&self, kind: EntityKind) -> Option<Revision> {
        Some(self.content.store().revision(kind))
    }
}
