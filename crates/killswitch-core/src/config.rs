use crate::audit_log::{AuditLog, FileAuditLog, MemoryAuditLog};
use crate::error::{KillSwitchError, Result};
use crate::policy::{AllowAll, AllowList, AuthorizationPolicy, RootAuthority};
use crate::store::{MemoryStore, RedbStore, StateStore};
use crate::types::{validate_key, PrincipalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_FILE: &str = "killswitch.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Redb {
        path: PathBuf,
    },
}

impl StoreConfig {
    /// Open the configured store. Relative paths resolve against `base`; a
    /// durable store keeps `namespace`'s switches apart from other
    /// namespaces in the same file.
    pub fn open(&self, base: &Path, namespace: &str) -> Result<Arc<dyn StateStore>> {
        match self {
            StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreConfig::Redb { path } => {
                let store = RedbStore::open(&base.join(path), namespace)?;
                Ok(Arc::new(store))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AuditLogConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditLogConfig {
    #[default]
    Memory,
    File {
        path: PathBuf,
    },
}

impl AuditLogConfig {
    pub fn open(&self, base: &Path) -> Result<Arc<dyn AuditLog>> {
        match self {
            AuditLogConfig::Memory => Ok(Arc::new(MemoryAuditLog::new())),
            AuditLogConfig::File { path } => Ok(Arc::new(FileAuditLog::open(&base.join(path))?)),
        }
    }
}

// ---------------------------------------------------------------------------
// PolicyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Any authenticated principal may toggle any switch.
    #[default]
    AllowAll,
    RootAuthority {
        principal: String,
    },
    AllowList {
        #[serde(default)]
        keys: BTreeMap<String, Vec<String>>,
        #[serde(default)]
        auditors: Vec<String>,
    },
}

impl PolicyConfig {
    pub fn build(&self) -> Arc<dyn AuthorizationPolicy> {
        match self {
            PolicyConfig::AllowAll => Arc::new(AllowAll),
            PolicyConfig::RootAuthority { principal } => {
                Arc::new(RootAuthority::new(PrincipalId::new(principal.clone())))
            }
            PolicyConfig::AllowList { keys, auditors } => {
                let mut list = AllowList::new();
                for (key, principals) in keys {
                    for p in principals {
                        list = list.allow(key.clone(), p.clone());
                    }
                }
                for a in auditors {
                    list = list.auditor(a.clone());
                }
                Arc::new(list)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityConfig
// ---------------------------------------------------------------------------

/// How the server learns the caller's principal from the identity proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Header carrying the verified principal id.
    #[serde(default = "default_identity_header")]
    pub header: String,
    /// Shared secret the identity proxy presents as `Authorization: Bearer`.
    /// When unset the principal header is trusted as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_identity_header() -> String {
    "x-principal-id".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: default_identity_header(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ToggleConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleConfig {
    /// Compare-and-set attempts per toggle before reporting contention.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Scopes the durable store; two services sharing a database file see
    /// only their own namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Switch seeded at startup and reported by `/status`.
    #[serde(default = "default_key")]
    pub default_key: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit_log: AuditLogConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub toggle: ToggleConfig,
}

fn default_version() -> u32 {
    1
}

fn default_namespace() -> String {
    "default-app-id".to_string()
}

fn default_key() -> String {
    "global_kill_switch".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            namespace: default_namespace(),
            default_key: default_key(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            audit_log: AuditLogConfig::default(),
            policy: PolicyConfig::default(),
            identity: IdentityConfig::default(),
            toggle: ToggleConfig::default(),
        }
    }
}

impl Config {
    /// Config written by `killswitch init`: durable store and log under
    /// `data/`, everything else at defaults.
    pub fn durable() -> Self {
        Self {
            store: StoreConfig::Redb {
                path: PathBuf::from("data/switches.redb"),
            },
            audit_log: AuditLogConfig::File {
                path: PathBuf::from("data/audit.jsonl"),
            },
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KillSwitchError::Config(format!(
                "{} not found: run 'killswitch init'",
                path.display()
            )));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        if validate_key(&self.default_key).is_err() {
            push(
                WarnLevel::Error,
                format!("default_key '{}' is not a valid switch key", self.default_key),
            );
        }

        if self.toggle.max_attempts == 0 {
            push(
                WarnLevel::Error,
                "toggle.max_attempts must be at least 1".to_string(),
            );
        } else if self.toggle.max_attempts > 10 {
            push(
                WarnLevel::Warning,
                format!(
                    "toggle.max_attempts={} (>10 is unusual)",
                    self.toggle.max_attempts
                ),
            );
        }

        if self.identity.header.trim().is_empty() {
            push(WarnLevel::Error, "identity.header is empty".to_string());
        }
        if self.identity.token.is_none() {
            push(
                WarnLevel::Warning,
                format!(
                    "identity.token is not set: the '{}' header is trusted from any client",
                    self.identity.header
                ),
            );
        }

        if self.namespace.trim().is_empty() {
            push(WarnLevel::Error, "namespace is empty".to_string());
        }

        match &self.policy {
            PolicyConfig::AllowAll => push(
                WarnLevel::Warning,
                "policy allow_all: any authenticated principal may flip any switch".to_string(),
            ),
            PolicyConfig::RootAuthority { principal } if principal.trim().is_empty() => push(
                WarnLevel::Error,
                "policy root_authority has an empty principal".to_string(),
            ),
            PolicyConfig::RootAuthority { .. } => {}
            PolicyConfig::AllowList { keys, .. } => {
                if keys.values().all(|v| v.is_empty()) {
                    push(
                        WarnLevel::Warning,
                        "policy allow_list grants toggle to nobody".to_string(),
                    );
                }
                for key in keys.keys() {
                    if key != crate::policy::ANY_KEY && validate_key(key).is_err() {
                        push(
                            WarnLevel::Error,
                            format!("allow_list key '{key}' is not a valid switch key"),
                        );
                    }
                }
            }
        }

        if matches!(self.store, StoreConfig::Memory) {
            push(
                WarnLevel::Warning,
                "store is in-memory: switch state is lost on restart".to_string(),
            );
        }

        warnings
    }

    pub fn has_errors(&self) -> bool {
        self.validate().iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
