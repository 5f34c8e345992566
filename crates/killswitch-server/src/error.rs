use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use killswitch_core::KillSwitchError;

// ---------------------------------------------------------------------------
// Sentinels for statuses the core error does not carry
// ---------------------------------------------------------------------------

/// No verified principal on a request that needs one.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Unauthenticated(String);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct NotFoundError(String);

/// Request body that could not be read as the route's JSON payload.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct BadRequest(String);

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses. The body is always
/// `{"error": <kind>, "detail": <text>}`.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// 401: the identity collaborator did not vouch for the caller.
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self(Unauthenticated(msg.into()).into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    /// 400 for a body axum's `Json` extractor rejected.
    pub fn bad_request(rejection: JsonRejection) -> Self {
        Self(BadRequest(rejection.body_text()).into())
    }

    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        if self.0.downcast_ref::<Unauthenticated>().is_some() {
            return (StatusCode::UNAUTHORIZED, "Unauthorized");
        }
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return (StatusCode::NOT_FOUND, "NotFound");
        }
        if self.0.downcast_ref::<BadRequest>().is_some() {
            return (StatusCode::BAD_REQUEST, "InvalidRequest");
        }
        match self.0.downcast_ref::<KillSwitchError>() {
            Some(e) => {
                let status = match e {
                    KillSwitchError::NotFound(_) => StatusCode::NOT_FOUND,
                    KillSwitchError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                    KillSwitchError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                    KillSwitchError::Contention { .. } => StatusCode::CONFLICT,
                    KillSwitchError::Storage(_)
                    | KillSwitchError::AuditLog(_)
                    | KillSwitchError::Config(_)
                    | KillSwitchError::Io(_)
                    | KillSwitchError::Yaml(_)
                    | KillSwitchError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind())
            }
            None => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", self.0), "request failed");
        }
        let body = serde_json::json!({ "error": kind, "detail": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
