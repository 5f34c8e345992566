use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use tokio_stream::StreamExt as _;

use crate::error::AppError;
use crate::state::AppState;

/// GET /switches/{key}/watch: SSE stream of `switch` events, one JSON
/// `SwitchRecord` per frame, starting with the current state. Versions are
/// strictly increasing; intermediate states may be skipped. The subscription
/// is released when the client disconnects.
pub async fn watch_switch(
    State(app): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let service = app.service.clone();
    let subscription = tokio::task::spawn_blocking(move || service.watch(&key))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    tracing::debug!(key = %subscription.key(), "watch subscribed");
    let stream = subscription.map(|record| Event::default().event("switch").json_data(&record));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
