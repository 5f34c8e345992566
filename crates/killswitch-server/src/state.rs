use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use killswitch_core::config::{Config, IdentityConfig};
use killswitch_core::KillSwitchService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<KillSwitchService>,
    pub identity: Arc<IdentityConfig>,
    /// Switch reported by `GET /status`.
    pub default_key: String,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: KillSwitchService, identity: IdentityConfig, default_key: String) -> Self {
        Self {
            service: Arc::new(service),
            identity: Arc::new(identity),
            default_key,
            started_at: Utc::now(),
        }
    }

    /// Open the configured store and audit log (relative to `base`) and seed
    /// the default key.
    pub fn from_config(config: &Config, base: &Path) -> killswitch_core::Result<Self> {
        let service = KillSwitchService::from_config(config, base)?;
        Ok(Self::new(
            service,
            config.identity.clone(),
            config.default_key.clone(),
        ))
    }
}
