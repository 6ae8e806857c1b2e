pub mod admin;
pub mod auth;
pub mod connect;
pub mod discovery;
pub mod error;
pub mod resources;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Three surfaces:
/// - **public** — health, discovery, the prepare endpoint
/// - **data plane** — PoP-authenticated inside the pipeline itself
/// - **admin** — gated behind the bearer-token middleware
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(admin::health))
        .route("/.well-known/resources", get(discovery::well_known_resources))
        .route("/api/connect/prepare", post(connect::prepare));

    let data_plane = Router::new()
        .route(
            "/r/:rtype/:provider/v1/chat/completions",
            post(resources::chat_completions_by_path),
        )
        .route(
            "/v1/chat/completions",
            post(resources::chat_completions_by_header),
        );

    let admin = Router::new()
        .route("/api/admin/pairing-codes", post(admin::create_pairing_code))
        .route("/api/admin/sessions", get(admin::list_sessions))
        .route(
            "/api/admin/sessions/:token/approve",
            post(admin::approve_session),
        )
        .route(
            "/api/admin/sessions/:token/reject",
            post(admin::reject_session),
        )
        .route("/api/admin/apps", get(admin::list_apps))
        .route("/api/admin/apps/:id/status", post(admin::set_app_status))
        .route(
            "/api/admin/resources/:rtype/:provider/secret",
            put(admin::put_resource_secret),
        )
        .route(
            "/api/admin/resources/:rtype/:provider/secret",
            delete(admin::disable_resource_secret),
        )
        .route("/api/admin/logs", get(admin::recent_logs))
        .route("/api/admin/usage", get(admin::usage_snapshot))
        // Apply admin auth middleware to all admin routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_admin_token,
        ));

    public
        .merge(data_plane)
        .merge(admin)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
