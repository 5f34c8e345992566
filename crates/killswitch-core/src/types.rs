use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{KillSwitchError, Result};

// ---------------------------------------------------------------------------
// PrincipalId
// ---------------------------------------------------------------------------

/// Opaque identity of an authenticated caller.
///
/// Minted by the external identity provider; this crate only stores and
/// compares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Actor recorded on records created by default-creation.
    pub const SYSTEM: &'static str = "System";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// SwitchRecord
// ---------------------------------------------------------------------------

/// One versioned boolean switch.
///
/// `version` starts at 0 and increases by exactly one per accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRecord {
    pub key: String,
    pub active: bool,
    pub version: u64,
    pub last_actor: PrincipalId,
    pub updated_at: DateTime<Utc>,
}

impl SwitchRecord {
    /// The record a key gets on first access: inactive, version 0.
    pub fn initial(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            active: false,
            version: 0,
            last_actor: PrincipalId::system(),
            updated_at: Utc::now(),
        }
    }

    /// The successor record produced by an accepted write.
    pub fn next(&self, active: bool, actor: &PrincipalId) -> Self {
        Self {
            key: self.key.clone(),
            active,
            version: self.version + 1,
            last_actor: actor.clone(),
            updated_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SwitchState {
        if self.active {
            SwitchState::Active
        } else {
            SwitchState::Inactive
        }
    }
}

// ---------------------------------------------------------------------------
// SwitchState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchState {
    Inactive,
    Active,
}

impl SwitchState {
    /// Operator-facing banner for a switch in this state.
    pub fn banner(self) -> &'static str {
        match self {
            SwitchState::Inactive => "NOMINAL OPERATION",
            SwitchState::Active => "EMERGENCY SHUTDOWN ACTIVE (KILL-SWITCH)",
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchState::Inactive => f.write_str("INACTIVE"),
            SwitchState::Active => f.write_str("ACTIVE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Operations the Authorization Gate rules on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Toggle,
    RunAudit,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Toggle => "toggle",
            Action::RunAudit => "run_audit",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

fn key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("static regex"))
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 128 || !key_re().is_match(key) {
        return Err(KillSwitchError::InvalidKey(key.to_string()));
    }
    Ok(())
}
