use thiserror::Error;

/// Failures of a single State Store call.
///
/// `VersionConflict` is transient: the service retries it internally and only
/// surfaces `KillSwitchError::Contention` once the attempt budget is spent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("switch not found: {0}")]
    NotFound(String),

    #[error("version conflict on '{key}': expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum KillSwitchError {
    #[error("switch not found: {0}")]
    NotFound(String),

    #[error("invalid switch key '{0}': must be 1-128 characters of [A-Za-z0-9_.-]")]
    InvalidKey(String),

    #[error("principal '{principal}' may not {action} '{key}': {reason}")]
    Unauthorized {
        principal: String,
        key: String,
        action: String,
        reason: String,
    },

    #[error("contention on '{key}': gave up after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("audit log error: {0}")]
    AuditLog(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for KillSwitchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => KillSwitchError::NotFound(key),
            // Only reachable when a caller bypasses the retry loop.
            StoreError::VersionConflict { key, .. } => {
                KillSwitchError::Contention { key, attempts: 1 }
            }
            StoreError::Backend(msg) => KillSwitchError::Storage(msg),
        }
    }
}

impl KillSwitchError {
    /// Stable, caller-facing name of the failure kind. Used as the `error`
    /// field of HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            KillSwitchError::NotFound(_) => "NotFound",
            KillSwitchError::InvalidKey(_) => "InvalidKey",
            KillSwitchError::Unauthorized { .. } => "Unauthorized",
            KillSwitchError::Contention { .. } => "Contention",
            KillSwitchError::Storage(_)
            | KillSwitchError::AuditLog(_)
            | KillSwitchError::Config(_)
            | KillSwitchError::Io(_)
            | KillSwitchError::Yaml(_)
            | KillSwitchError::Json(_) => "Internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, KillSwitchError>;
