use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use killswitch_core::SwitchRecord;
use serde::Deserialize;

use crate::auth::Principal;
use crate::error::AppError;
use crate::state::AppState;

/// GET /switches: every known switch, ordered by key.
pub async fn list_switches(
    State(app): State<AppState>,
) -> Result<Json<Vec<SwitchRecord>>, AppError> {
    let service = app.service.clone();
    let records = tokio::task::spawn_blocking(move || service.list())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(records))
}

/// GET /switches/{key}: current record, created inactive on first access.
pub async fn get_switch(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SwitchRecord>, AppError> {
    let service = app.service.clone();
    let record = tokio::task::spawn_blocking(move || service.get(&key))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(record))
}

/// POST /switches/{key}/toggle: flip on behalf of the calling principal.
pub async fn toggle_switch(
    State(app): State<AppState>,
    Path(key): Path<String>,
    Principal(principal): Principal,
) -> Result<Json<SwitchRecord>, AppError> {
    let service = app.service.clone();
    let record = tokio::task::spawn_blocking(move || service.toggle(&key, &principal))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct SetSwitchBody {
    pub active: bool,
}

/// PUT /switches/{key}: drive to `active`; a no-op when already there.
pub async fn set_switch(
    State(app): State<AppState>,
    Path(key): Path<String>,
    Principal(principal): Principal,
    body: Result<Json<SetSwitchBody>, JsonRejection>,
) -> Result<Json<SwitchRecord>, AppError> {
    let Json(body) = body.map_err(AppError::bad_request)?;
    let service = app.service.clone();
    let record =
        tokio::task::spawn_blocking(move || service.set(&key, body.active, &principal))
            .await
            .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(record))
}
