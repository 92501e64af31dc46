//! HTTP routes

mod health;
mod limits;
mod subscription;
mod webhooks;


use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/subscription", get(subscription::get_subscription))
        .route("/subscription/ensure", post(subscription::ensure_subscription))
        .route("/usage", get(subscription::get_usage))
        .route("/usage/initiatives", post(limits::reserve_initiative))
        .route("/limits/initiatives", get(limits::check_initiatives))
        .route("/limits/documents/{document_type}", get(limits::check_document))
        .route("/limits/export", get(limits::check_export))
        .route("/billing/plan", post(subscription::select_plan))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_auth,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/webhooks/clerk", post(webhooks::clerk_webhook))
        .nest("/api/v1", protected)
        .with_state(state)
}
