use axum::extract::State;
use axum::Json;
use killswitch_core::service::SwitchStatus;

use crate::error::AppError;
use crate::state::AppState;

/// GET /health: liveness plus a little wiring detail.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let uptime = chrono::Utc::now() - app.started_at;
    Json(serde_json::json!({
        "status": "ok",
        "policy": app.service.policy_name(),
        "checks": app.service.check_names(),
        "defaultKey": app.default_key,
        "uptimeSeconds": uptime.num_seconds(),
    }))
}

/// GET /status: operator banner for the default switch.
pub async fn status(State(app): State<AppState>) -> Result<Json<SwitchStatus>, AppError> {
    let service = app.service.clone();
    let key = app.default_key.clone();
    let status = tokio::task::spawn_blocking(move || service.status(&key))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(status))
}
