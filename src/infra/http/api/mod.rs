pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, patch, post},
};

use crate::domain::{
    AppointmentRecord, BlogPostRecord, Entity, InquiryRecord, PortfolioItemRecord, ServiceRecord,
    TestimonialRecord,
};

pub fn build_api_router() -> Router<ApiState> {
    let router = Router::new()
        .route("/api/admin/login", post(handlers::login))
        .route("/api/admin/logout", post(handlers::logout))
        .route("/api/admin/dashboard", get(handlers::dashboard))
        .route("/api/admin/revisions", get(handlers::revisions))
        .route(
            "/api/admin/appointments/{id}/status",
            patch(handlers::appointment_status),
        )
        .route("/api/admin/blog/{id}/status", patch(handlers::post_status));

    let router = public_routes::<ServiceRecord>(router);
    let router = public_routes::<PortfolioItemRecord>(router);
    let router = public_routes::<BlogPostRecord>(router);
    let router = public_routes::<TestimonialRecord>(router);

    let router = admin_routes::<ServiceRecord>(router);
    let router = admin_routes::<PortfolioItemRecord>(router);
    let router = admin_routes::<AppointmentRecord>(router);
    let router = admin_routes::<InquiryRecord>(router);
    let router = admin_routes::<BlogPostRecord>(router);
    let router = admin_routes::<TestimonialRecord>(router);

    router.layer(axum_middleware::from_fn(middleware::session_token))
}

fn public_routes<E: Entity>(router: Router<ApiState>) -> Router<ApiState> {
    let slug = E::KIND.route_slug();
    router
        .route(&format!("/api/{slug}"), get(handlers::list_public::<E>))
        .route(&format!("/api/{slug}/{{id}}"), get(handlers::get_public::<E>))
}

fn admin_routes<E: Entity>(router: Router<ApiState>) -> Router<ApiState> {
    let slug = E::KIND.route_slug();
    router
        .route(
            &format!("/api/admin/{slug}"),
            get(handlers::admin_list::<E>).post(handlers::create::<E>),
        )
        .route(
            &format!("/api/admin/{slug}/{{id}}"),
            get(handlers::admin_get::<E>)
                .put(handlers::update::<E>)
                .patch(handlers::patch::<E>)
                .delete(handlers::delete::<E>),
        )
}
