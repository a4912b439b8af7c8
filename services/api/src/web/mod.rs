pub mod auth;
pub mod chat;
pub mod extract;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_auth;
pub use state::AppState;

/// Builds the API router: public auth routes plus bearer-protected routes.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me_handler))
        .route(
            "/profiles",
            post(rest::create_profile_handler).get(rest::list_profiles_handler),
        )
        .route("/profiles/{profile_id}", get(rest::get_profile_handler))
        .route(
            "/profiles/{profile_id}/sessions",
            post(rest::create_session_handler).get(rest::list_sessions_handler),
        )
        .route(
            "/profiles/{profile_id}/sessions/{chatlog_id}/messages",
            get(chat::list_messages_handler),
        )
        .route("/sessions/{chatlog_id}/messages", post(chat::respond_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
