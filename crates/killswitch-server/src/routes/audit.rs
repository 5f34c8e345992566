use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use killswitch_core::audit::AuditReport;
use killswitch_core::audit_log::AuditEntry;
use serde::Deserialize;

use crate::auth::Principal;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RunAuditBody {
    #[serde(default)]
    pub checks: Vec<String>,
}

/// POST /audit/run: run the named checks in order and return the sealed
/// report. Unknown names appear in the report as `FAIL`.
pub async fn run_audit(
    State(app): State<AppState>,
    Principal(principal): Principal,
    body: Result<Json<RunAuditBody>, JsonRejection>,
) -> Result<Json<AuditReport>, AppError> {
    let Json(body) = body.map_err(AppError::bad_request)?;
    let service = app.service.clone();
    let report = tokio::task::spawn_blocking(move || service.run_audit(&body.checks, &principal))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(report))
}

/// GET /audit/reports/latest
pub async fn latest_report(State(app): State<AppState>) -> Result<Json<AuditReport>, AppError> {
    app.service
        .latest_report()
        .map(Json)
        .ok_or_else(|| AppError::not_found("no audit has been run yet"))
}

/// GET /audit/log: hash-chained toggle history, oldest first.
pub async fn audit_log(State(app): State<AppState>) -> Result<Json<Vec<AuditEntry>>, AppError> {
    let service = app.service.clone();
    let entries = tokio::task::spawn_blocking(move || service.audit_entries())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(entries))
}
