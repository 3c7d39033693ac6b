//! The daemon's axum HTTP surface: Blossom blob endpoints, the `/ws`
//! signalling relay, `/api/peers`, and a basic-auth gate in front of
//! everything except health checks and `GET`s.

pub mod auth;
pub mod handlers;
pub mod ws_relay;

use axum::{
    middleware,
    routing::{delete, get, head, put},
    Router,
};

use auth::AppState;

/// Builds the daemon's router: Blossom HTTP endpoints, the WebSocket
/// signalling relay, and peer/health introspection, all behind the
/// basic-auth middleware when `state.auth` is configured.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload", put(handlers::upload_blob))
        .route(
            "/:hash",
            get(handlers::get_blob)
                .head(handlers::head_blob)
                .delete(handlers::delete_blob),
        )
        .route("/ws", get(ws_relay::ws_signal))
        .route("/api/peers", get(handlers::api_peers))
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .with_state(state)
}
