pub mod error;
pub mod routes;
pub mod state;

use std::path::PathBuf;

use axum::routing::{get, post};
use axum::Router;
use courier_core::config::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Actions
        .route("/api/actions/run", post(routes::actions::run_actions))
        // Named user
        .route(
            "/api/named-user",
            get(routes::named_user::get_named_user)
                .put(routes::named_user::put_named_user)
                .delete(routes::named_user::delete_named_user),
        )
        .route(
            "/api/named-user/force-update",
            post(routes::named_user::force_update),
        )
        .route(
            "/api/named-user/tags",
            post(routes::named_user::edit_tag_groups),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the courier server on `port`.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Start the courier server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let config = Config::load(&root)?;
    for warning in config.validate() {
        tracing::warn!(level = ?warning.level, "{}", warning.message);
    }

    let (app_state, worker) = AppState::open(&root, &config)?;
    let courier = app_state.courier.clone();
    let worker = worker.spawn();
    let named_user = courier.named_user().clone();
    tokio::task::spawn_blocking(move || named_user.init()).await??;

    let app = build_router(app_state);
    tracing::info!("courier server listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("courier server stopping, draining jobs");
    courier.shutdown();
    worker.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
