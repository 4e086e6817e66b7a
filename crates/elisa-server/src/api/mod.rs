pub mod sessions;
pub mod skills;

use axum::Router;

use elisa_core::state::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/sessions", sessions::router())
        .nest("/api/skills", skills::router())
}
