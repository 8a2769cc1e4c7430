use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use verdant_api_types::{ApiErrorBody, error_kinds};

use crate::application::content::ContentError;
use crate::application::error::ErrorReport;

/// JSON error response: `{ "kind", "field"?, "reason" }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    field: Option<String>,
    reason: String,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            field: None,
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_kinds::BAD_REQUEST, reason)
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::new(StatusCode::BAD_REQUEST, error_kinds::VALIDATION, reason)
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error_kinds::NOT_FOUND, reason)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ContentError> for ApiError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::Validation { field, reason } => ApiError::validation(field, reason),
            ContentError::NotFound { kind, id } => {
                ApiError::not_found(format!("{kind} `{id}` not found"))
            }
            ContentError::Unauthorized => ApiError::new(
                StatusCode::UNAUTHORIZED,
                error_kinds::UNAUTHORIZED,
                "admin session required",
            ),
            ContentError::SessionExpired => ApiError::new(
                StatusCode::UNAUTHORIZED,
                error_kinds::SESSION_EXPIRED,
                "admin session expired",
            ),
            ContentError::InvalidCredentials => ApiError::new(
                StatusCode::UNAUTHORIZED,
                error_kinds::INVALID_CREDENTIALS,
                "invalid username or password",
            ),
            ContentError::RateLimited { retry_after_secs } => Self {
                retry_after: Some(retry_after_secs),
                ..ApiError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    error_kinds::RATE_LIMITED,
                    format!("too many failed logins; retry after {retry_after_secs} seconds"),
                )
            },
            ContentError::StoreFailure(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                error_kinds::STORE_FAILURE,
                message,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self.field {
            Some(field) => format!("{}: {field}: {}", self.kind, self.reason),
            None => format!("{}: {}", self.kind, self.reason),
        };
        // Internal failures keep their detail in the report only.
        let reason = if self.status.is_server_error() {
            "internal store failure".to_string()
        } else {
            self.reason
        };
        let body = ApiErrorBody {
            kind: self.kind.to_string(),
            field: self.field,
            reason,
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        ErrorReport::from_message("infra::http::api", self.status, detail).attach(&mut response);
        response
    }
}
