pub mod api;
mod middleware;

pub use api::ApiState;
pub use middleware::RequestContext;

use axum::{Router, middleware as axum_middleware, routing::get};

use crate::application::content::ContentService;

/// Full HTTP surface: health probe plus the content API.
pub fn build_router(content: ContentService) -> Router {
    Router::new()
        .route("/healthz", get(api::handlers::health))
        .merge(api::build_api_router())
        .with_state(ApiState::new(content))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
