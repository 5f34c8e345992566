pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Switches
        .route("/switches", get(routes::switches::list_switches))
        .route(
            "/switches/{key}",
            get(routes::switches::get_switch).put(routes::switches::set_switch),
        )
        .route(
            "/switches/{key}/toggle",
            post(routes::switches::toggle_switch),
        )
        // Watch (SSE)
        .route("/switches/{key}/watch", get(routes::watch::watch_switch))
        // Audit
        .route("/audit/run", post(routes::audit::run_audit))
        .route("/audit/log", get(routes::audit::audit_log))
        .route(
            "/audit/reports/latest",
            get(routes::audit::latest_report),
        )
        // Status
        .route("/status", get(routes::status::status))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::identity_middleware,
        ))
        // Health stays outside the identity gate.
        .route("/health", get(routes::status::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the kill-switch server on a pre-bound listener, so the caller can
/// read the actual port first when the OS picked it. Stops on ctrl-c.
pub async fn serve_on(app_state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(
        policy = app_state.service.policy_name(),
        default_key = %app_state.default_key,
        "kill-switch server listening on http://{addr}"
    );
    axum::serve(listener, build_router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("kill-switch server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
