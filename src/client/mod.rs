//! HTTP client for the content API.
//!
//! [`ContentClient`] speaks the JSON surface served by `infra::http` and
//! implements [`ContentSource`], so a [`crate::cache::ContentCache`] can sit
//! directly on top of a remote server.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url, header};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use verdant_api_types::{
    ApiErrorBody, DashboardSummary, DeletedResponse, LoginRequest, LoginResponse,
    RevisionsResponse, StatusChangeRequest, error_kinds,
};

use crate::application::content::Audience;
use crate::application::store::{Committed, Listing};
use crate::cache::{ContentSource, FetchError};
use crate::domain::{
    AppointmentRecord, AppointmentStatus, BlogPostRecord, Entity, EntityKind, ListFilter,
    PublishStatus, Revision,
};
use crate::infra::http::api::models::{
    EnvelopeError, parse_collection, parse_committed, parse_record,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Remote content API client. Holds the admin session token once logged in.
pub struct ContentClient {
    http: Client,
    base: Url,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for ContentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentClient")
            .field("base", &self.base.as_str())
            .field("authenticated", &self.token().is_some())
            .finish()
    }
}

impl ContentClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = Client::builder().user_agent(Self::user_agent()).build()?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url)?;
        base.set_query(None);
        base.set_fragment(None);
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http,
            base,
            token: RwLock::new(None),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("verdant-client/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_token(&self, token: Option<String>) {
        let mut slot = self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = token;
    }

    /// Exchange credentials for a session token and keep it for later calls.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, FetchError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let body = self
            .send(Method::POST, "/api/admin/login", &[], Some(&to_body(&request)?))
            .await?;
        let session: LoginResponse = decode(body)?;
        self.set_token(Some(session.token.clone()));
        debug!(expires_at = %session.expires_at, "admin session established");
        Ok(session)
    }

    /// Revoke the session server-side. The local token is dropped even when the call fails.
    pub async fn logout(&self) -> Result<(), FetchError> {
        let result = self
            .send(Method::POST, "/api/admin/logout", &[], None)
            .await
            .map(|_| ());
        self.set_token(None);
        result
    }

    pub async fn revisions(&self) -> Result<BTreeMap<EntityKind, Revision>, FetchError> {
        let body = self.read("/api/admin/revisions", &[]).await?;
        let response: RevisionsResponse = decode(body)?;
        Ok(response
            .revisions
            .into_iter()
            .filter_map(|(slug, revision)| {
                EntityKind::from_route_slug(&slug).map(|kind| (kind, revision))
            })
            .collect())
    }

    pub async fn health(&self) -> Result<(), FetchError> {
        self.read("/healthz", &[]).await.map(|_| ())
    }

    /// GET with a single retry on transport failures and server errors.
    async fn read(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
        match self.send(Method::GET, path, query, None).await {
            Err(err) if err.is_retryable() => {
                warn!(path, error = %err, "read failed; retrying once");
                self.send(Method::GET, path, query, None).await
            }
            other => other,
        }
    }

    /// Writes go out exactly once.
    async fn write(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, FetchError> {
        self.send(method, path, &[], body).await
    }

    /// Resolve an API path under the base URL, keeping any mount prefix.
    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base.join(path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, FetchError> {
        let mut url = self
            .endpoint(path)
            .map_err(|err| FetchError::Transport(format!("invalid path `{path}`: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }

        let mut request = self.http.request(method, url);
        if let Some(token) = self.token() {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

#[async_trait]
impl ContentSource for ContentClient {
    async fn list<E: Entity>(
        &self,
        audience: Audience,
        filter: &ListFilter,
    ) -> Result<Listing<E>, FetchError> {
        let body = self
            .read(&collection_path(audience, E::KIND), &filter_query(filter))
            .await?;
        parse_collection(body).map_err(envelope)
    }

    async fn get<E: Entity>(&self, audience: Audience, id: Uuid) -> Result<E, FetchError> {
        let path = format!("{}/{id}", collection_path(audience, E::KIND));
        let body = self.read(&path, &[]).await?;
        let (entity, _) = parse_record(body).map_err(envelope)?;
        Ok(entity)
    }

    async fn create<E: Entity>(&self, draft: E::Draft) -> Result<Committed<E>, FetchError> {
        let path = collection_path(Audience::Admin, E::KIND);
        let body = self
            .write(Method::POST, &path, Some(&to_body(&draft)?))
            .await?;
        parse_committed(body).map_err(envelope)
    }

    async fn update<E: Entity>(
        &self,
        id: Uuid,
        draft: E::Draft,
    ) -> Result<Committed<E>, FetchError> {
        let path = format!("{}/{id}", collection_path(Audience::Admin, E::KIND));
        let body = self
            .write(Method::PUT, &path, Some(&to_body(&draft)?))
            .await?;
        parse_committed(body).map_err(envelope)
    }

    async fn patch<E: Entity>(
        &self,
        id: Uuid,
        patch: &Value,
    ) -> Result<Committed<E>, FetchError> {
        let path = format!("{}/{id}", collection_path(Audience::Admin, E::KIND));
        let body = self.write(Method::PATCH, &path, Some(patch)).await?;
        parse_committed(body).map_err(envelope)
    }

    async fn delete<E: Entity>(&self, id: Uuid) -> Result<Revision, FetchError> {
        let path = format!("{}/{id}", collection_path(Audience::Admin, E::KIND));
        let body = self.write(Method::DELETE, &path, None).await?;
        let deleted: DeletedResponse = decode(body)?;
        Ok(deleted.revision)
    }

    async fn set_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Committed<AppointmentRecord>, FetchError> {
        let path = format!("/api/admin/appointments/{id}/status");
        let body = to_body(&StatusChangeRequest { status })?;
        let body = self.write(Method::PATCH, &path, Some(&body)).await?;
        parse_committed(body).map_err(envelope)
    }

    async fn set_post_status(
        &self,
        id: Uuid,
        status: PublishStatus,
    ) -> Result<Committed<BlogPostRecord>, FetchError> {
        let path = format!("/api/admin/blog/{id}/status");
        let body = to_body(&StatusChangeRequest { status })?;
        let body = self.write(Method::PATCH, &path, Some(&body)).await?;
        parse_committed(body).map_err(envelope)
    }

    async fn dashboard(&self) -> Result<DashboardSummary, FetchError> {
        let body = self.read("/api/admin/dashboard", &[]).await?;
        decode(body)
    }
}

fn collection_path(audience: Audience, kind: EntityKind) -> String {
    match audience {
        Audience::Public => format!("/api/{}", kind.route_slug()),
        Audience::Admin => format!("/api/admin/{}", kind.route_slug()),
    }
}

fn filter_query(filter: &ListFilter) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(status) = filter.status {
        query.push(("status", status.as_str().to_string()));
    }
    if let Some(published) = filter.published {
        query.push(("published", published.to_string()));
    }
    if let Some(unread) = filter.unread {
        query.push(("unread", unread.to_string()));
    }
    query
}

fn api_error(status: StatusCode, bytes: &[u8]) -> FetchError {
    match serde_json::from_slice::<ApiErrorBody>(bytes) {
        Ok(body) => FetchError::Api {
            status: status.as_u16(),
            kind: body.kind,
            field: body.field,
            reason: body.reason,
        },
        Err(_) => {
            let kind = if status.is_server_error() {
                error_kinds::STORE_FAILURE
            } else {
                error_kinds::BAD_REQUEST
            };
            FetchError::Api {
                status: status.as_u16(),
                kind: kind.to_string(),
                field: None,
                reason: format!("status {status} body {}", String::from_utf8_lossy(bytes)),
            }
        }
    }
}

fn transport(err: reqwest::Error) -> FetchError {
    FetchError::Transport(err.to_string())
}

fn envelope(err: EnvelopeError) -> FetchError {
    FetchError::Decode(err.to_string())
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, FetchError> {
    serde_json::to_value(value).map_err(|err| FetchError::Decode(err.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, FetchError> {
    serde_json::from_value(body).map_err(|err| FetchError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_audience() {
        assert_eq!(
            collection_path(Audience::Public, EntityKind::PortfolioItem),
            "/api/portfolio"
        );
        assert_eq!(
            collection_path(Audience::Admin, EntityKind::Inquiry),
            "/api/admin/inquiries"
        );
    }

    #[test]
    fn filter_becomes_query_pairs() {
        let filter = ListFilter {
            status: Some(AppointmentStatus::Confirmed),
            published: None,
            unread: Some(true),
        };
        assert_eq!(
            filter_query(&filter),
            vec![
                ("status", "confirmed".to_string()),
                ("unread", "true".to_string())
            ]
        );
        assert!(filter_query(&ListFilter::default()).is_empty());
    }

    #[test]
    fn error_bodies_decode_into_api_errors() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            br#"{"kind":"validation","field":"price","reason":"must not be empty"}"#,
        );
        assert_eq!(
            err,
            FetchError::Api {
                status: 400,
                kind: "validation".to_string(),
                field: Some("price".to_string()),
                reason: "must not be empty".to_string(),
            }
        );

        let opaque = api_error(StatusCode::BAD_GATEWAY, b"upstream down");
        assert!(opaque.is_retryable());
        assert_eq!(opaque.kind(), Some("store_failure"));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = ContentClient::new("http://localhost:3000").expect("client");
        assert_eq!(client.base_url().as_str(), "http://localhost:3000/");
        assert!(client.token().is_none());

        let client = ContentClient::new("http://localhost:3000/site?x=1").expect("client");
        assert_eq!(client.base_url().as_str(), "http://localhost:3000/site/");
    }

    #[test]
    fn endpoints_keep_the_mount_prefix() {
        let client = ContentClient::new("http://localhost:3000/site/").expect("client");
        let url = client.endpoint("/api/admin/services").expect("url");
        assert_eq!(url.as_str(), "http://localhost:3000/site/api/admin/services");

        let root = ContentClient::new("http://localhost:3000").expect("client");
        assert_eq!(
            root.endpoint("/healthz").expect("url").as_str(),
            "http://localhost:3000/healthz"
        );
    }
}
