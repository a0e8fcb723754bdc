use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::healthcheck))
        // Prefix routes
        .route("/api/prefixes", get(handlers::prefixes::list_prefixes))
        .route("/api/prefixes", post(handlers::prefixes::create_prefix))
        .route("/api/prefixes/tree", get(handlers::prefixes::get_prefix_tree))
        .route("/api/prefixes/best-parent", get(handlers::prefixes::get_best_parent))
        .route("/api/prefixes/allocate-subnet", post(handlers::prefixes::allocate_subnet))
        .route("/api/prefixes/public-ip", post(handlers::prefixes::create_public_ip))
        .route("/api/prefixes/:id", get(handlers::prefixes::get_prefix))
        .route("/api/prefixes/:id", put(handlers::prefixes::update_prefix))
        .route("/api/prefixes/:id", delete(handlers::prefixes::delete_prefix))
        .route("/api/prefixes/:id/children", get(handlers::prefixes::get_prefix_children))
        .route("/api/prefixes/:id/available-subnets", get(handlers::prefixes::get_available_subnets))
        .route("/api/prefixes/:id/can-create-child", get(handlers::prefixes::can_create_child))
        .route("/api/prefixes/:id/can-associate-vpc", get(handlers::prefixes::can_associate_vpc))
        .route("/api/prefixes/:id/vpc-associations", get(handlers::prefixes::get_prefix_vpc_associations))
        // VRF routes
        .route("/api/vrfs", get(handlers::vrfs::list_vrfs))
        .route("/api/vrfs", post(handlers::vrfs::create_vrf))
        .route("/api/vrfs/:id", get(handlers::vrfs::get_vrf))
        .route("/api/vrfs/:id", put(handlers::vrfs::update_vrf))
        .route("/api/vrfs/:id", delete(handlers::vrfs::delete_vrf))
        // VPC routes
        .route("/api/vpcs", get(handlers::vpcs::list_vpcs))
        .route("/api/vpcs", post(handlers::vpcs::create_vpc))
        .route("/api/vpcs/:id", get(handlers::vpcs::get_vpc))
        .route("/api/vpcs/:id", put(handlers::vpcs::update_vpc))
        .route("/api/vpcs/:id", delete(handlers::vpcs::delete_vpc))
        .route("/api/vpcs/:id/associations", get(handlers::vpcs::get_vpc_associations))
        // VPC / prefix association routes
        .route("/api/vpc-associations", post(handlers::associations::create_association))
        .route("/api/vpc-associations/:id", delete(handlers::associations::delete_association))
        // Stats routes
        .route("/api/stats/idempotency", get(handlers::stats::idempotency_stats))
        // Add state and middleware
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Ensure every response echoes an X-Request-ID (generated when the client
/// sent none) and reports processing time.
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    if let Ok(value) = HeaderValue::from_str(&format!("{:.2}", elapsed_ms)) {
        response.headers_mut().insert("x-processing-time-ms", value);
    }

    response
}
