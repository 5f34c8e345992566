//! Authorization Gate: decides whether a principal may act on a switch.
//!
//! A policy is an immutable snapshot. `authorize` is a pure function of
//! `(principal, key, action)`; swapping policy means building a new service.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{Action, PrincipalId};

/// Key entry in an allow list that applies to every switch.
pub const ANY_KEY: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Granted,
    Denied { reason: String },
}

impl Decision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Decision::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted)
    }
}

pub trait AuthorizationPolicy: Send + Sync {
    fn authorize(&self, principal: &PrincipalId, key: &str, action: Action) -> Decision;

    /// Short policy name for logs and `config show`.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// AllowAll
// ---------------------------------------------------------------------------

/// Any authenticated principal may do anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AuthorizationPolicy for AllowAll {
    fn authorize(&self, _principal: &PrincipalId, _key: &str, _action: Action) -> Decision {
        Decision::Granted
    }

    fn name(&self) -> &'static str {
        "allow_all"
    }
}

// ---------------------------------------------------------------------------
// RootAuthority
// ---------------------------------------------------------------------------

/// A single root principal holds every permission on every key.
#[derive(Debug, Clone)]
pub struct RootAuthority {
    root: PrincipalId,
}

impl RootAuthority {
    pub fn new(root: PrincipalId) -> Self {
        Self { root }
    }
}

impl AuthorizationPolicy for RootAuthority {
    fn authorize(&self, principal: &PrincipalId, _key: &str, _action: Action) -> Decision {
        if *principal == self.root {
            Decision::Granted
        } else {
            Decision::denied(format!("only root authority '{}' may act", self.root))
        }
    }

    fn name(&self) -> &'static str {
        "root_authority"
    }
}

// ---------------------------------------------------------------------------
// AllowList
// ---------------------------------------------------------------------------

/// Per-key allow lists for `toggle`, plus an auditor list for `run_audit`.
///
/// The `*` key grants toggle on every switch. An empty auditor list lets any
/// authenticated principal run audits.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    keys: HashMap<String, HashSet<PrincipalId>>,
    auditors: HashSet<PrincipalId>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, key: impl Into<String>, principal: impl Into<PrincipalId>) -> Self {
        self.keys
            .entry(key.into())
            .or_default()
            .insert(principal.into());
        self
    }

    pub fn auditor(mut self, principal: impl Into<PrincipalId>) -> Self {
        self.auditors.insert(principal.into());
        self
    }

    fn listed(&self, key: &str, principal: &PrincipalId) -> bool {
        [key, ANY_KEY]
            .iter()
            .filter_map(|k| self.keys.get(*k))
            .any(|set| set.contains(principal))
    }
}

impl AuthorizationPolicy for AllowList {
    fn authorize(&self, principal: &PrincipalId, key: &str, action: Action) -> Decision {
        match action {
            Action::Toggle if self.listed(key, principal) => Decision::Granted,
            Action::Toggle => Decision::denied(format!(
                "'{principal}' is not on the allow list for '{key}'"
            )),
            Action::RunAudit if self.auditors.is_empty() || self.auditors.contains(principal) => {
                Decision::Granted
            }
            Action::RunAudit => Decision::denied(format!("'{principal}' is not an auditor")),
        }
    }

    fn name(&self) -> &'static str {
        "allow_list"
    }
}
