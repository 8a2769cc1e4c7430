//! Content API handlers.
//!
//! Entity handlers are generic over [`Entity`] and instantiated once per kind
//! when the router is built.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;
use verdant_api_types::{
    DeletedResponse, HealthResponse, LoginRequest, LoginResponse, RevisionsResponse,
    SESSION_COOKIE, StatusChangeRequest, error_kinds,
};

use crate::application::content::{Audience, ContentError};
use crate::application::sessions::{Credentials, Operation};
use crate::domain::{AppointmentStatus, Entity, EntityKind, ListFilter, PublishStatus};

use super::error::ApiError;
use super::middleware::PresentedToken;
use super::models::{collection_envelope, committed_envelope, record_envelope};
use super::state::ApiState;

type ApiResult = Result<Response, ApiError>;

// ----------------------------------------------------------------------------
// Entity reads
// ----------------------------------------------------------------------------

pub async fn list_public<E: Entity>(
    State(state): State<ApiState>,
    query: Result<Query<ListFilter>, QueryRejection>,
) -> ApiResult {
    let Query(filter) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let listing = state
        .content
        .list::<E>(Audience::Public, None, &filter)
        .await?;
    json_body(collection_envelope(&listing))
}

pub async fn get_public<E: Entity>(
    State(state): State<ApiState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult {
    let id = path_id(path)?;
    let entity = state.content.get::<E>(Audience::Public, None, id).await?;
    json_body(record_envelope(&entity, None))
}

pub async fn admin_list<E: Entity>(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    query: Result<Query<ListFilter>, QueryRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Read(E::KIND))?;
    let Query(filter) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let listing = state
        .content
        .list::<E>(Audience::Admin, token.as_deref(), &filter)
        .await?;
    json_body(collection_envelope(&listing))
}

pub async fn admin_get<E: Entity>(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Read(E::KIND))?;
    let id = path_id(path)?;
    let entity = state
        .content
        .get::<E>(Audience::Admin, token.as_deref(), id)
        .await?;
    json_body(record_envelope(&entity, None))
}

// ----------------------------------------------------------------------------
// Entity writes
// ----------------------------------------------------------------------------

pub async fn create<E: Entity>(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Write(E::KIND))?;
    let draft = decode_draft::<E>(body)?;
    let committed = state.content.create::<E>(token.as_deref(), draft).await?;
    json_body(committed_envelope(&committed))
}

pub async fn update<E: Entity>(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Write(E::KIND))?;
    let id = path_id(path)?;
    let draft = decode_draft::<E>(body)?;
    let committed = state
        .content
        .update::<E>(token.as_deref(), id, draft)
        .await?;
    json_body(committed_envelope(&committed))
}

pub async fn patch<E: Entity>(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Write(E::KIND))?;
    let id = path_id(path)?;
    let Json(patch) = body.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let committed = state
        .content
        .patch::<E>(token.as_deref(), id, &patch)
        .await?;
    json_body(committed_envelope(&committed))
}

pub async fn delete<E: Entity>(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Write(E::KIND))?;
    let id = path_id(path)?;
    let revision = state.content.delete::<E>(token.as_deref(), id).await?;
    Ok(Json(DeletedResponse { revision }).into_response())
}

pub async fn appointment_status(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<StatusChangeRequest<AppointmentStatus>>, JsonRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Write(EntityKind::Appointment))?;
    let id = path_id(path)?;
    let Json(request) = body.map_err(|err| ApiError::validation("status", err.body_text()))?;
    let committed = state
        .content
        .set_appointment_status(token.as_deref(), id, request.status)
        .await?;
    json_body(committed_envelope(&committed))
}

pub async fn post_status(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<StatusChangeRequest<PublishStatus>>, JsonRejection>,
) -> ApiResult {
    require_session(&state, &token, Operation::Write(EntityKind::BlogPost))?;
    let id = path_id(path)?;
    let Json(request) = body.map_err(|err| ApiError::validation("status", err.body_text()))?;
    let committed = state
        .content
        .set_post_status(token.as_deref(), id, request.status)
        .await?;
    json_body(committed_envelope(&committed))
}

// ----------------------------------------------------------------------------
// Admin utilities
// ----------------------------------------------------------------------------

pub async fn dashboard(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
) -> ApiResult {
    let summary = state.content.dashboard(token.as_deref()).await?;
    Ok(Json(summary).into_response())
}

pub async fn revisions(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
) -> ApiResult {
    let revisions = state
        .content
        .revisions(token.as_deref())?
        .into_iter()
        .map(|(kind, revision)| (kind.route_slug().to_string(), revision))
        .collect();
    Ok(Json(RevisionsResponse { revisions }).into_response())
}

pub async fn login(
    State(state): State<ApiState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body.map_err(|err| ApiError::bad_request(err.body_text()))?;
    let session = state.content.login(&Credentials {
        username: request.username,
        password: request.password,
    })?;

    let cookie = Cookie::build((SESSION_COOKIE, session.token.clone()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/");
    let body = LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
    };
    Ok((jar.add(cookie), Json(body)).into_response())
}

pub async fn logout(
    State(state): State<ApiState>,
    Extension(token): Extension<PresentedToken>,
    jar: CookieJar,
) -> ApiResult {
    state.content.logout(token.as_deref());
    let mut cookie = Cookie::from(SESSION_COOKIE);
    cookie.set_path("/");
    Ok((jar.remove(cookie), StatusCode::NO_CONTENT).into_response())
}

pub async fn health(State(state): State<ApiState>) -> Response {
    match state.content.health().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
        })
        .into_response(),
        Err(err) => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_kinds::STORE_FAILURE,
            err.to_string(),
        )
        .into_response(),
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Rejects callers without a live session before anything they sent is decoded.
fn require_session(
    state: &ApiState,
    token: &PresentedToken,
    operation: Operation,
) -> Result<(), ApiError> {
    state
        .content
        .guard()
        .authorize(token.as_deref(), operation)
        .map(|_| ())
        .map_err(|err| ContentError::from(err).into())
}

fn path_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|err| ApiError::bad_request(err.body_text()))
}

fn decode_draft<E: Entity>(body: Result<Json<Value>, JsonRejection>) -> Result<E::Draft, ApiError> {
    let Json(value) = body.map_err(|err| ApiError::bad_request(err.body_text()))?;
    serde_json::from_value(value).map_err(|err| ApiError::validation("body", err.to_string()))
}

fn json_body<T: Serialize>(encoded: Result<T, serde_json::Error>) -> ApiResult {
    encoded.map(|body| Json(body).into_response()).map_err(|err| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_kinds::STORE_FAILURE,
            format!("response encoding failed: {err}"),
        )
    })
}
