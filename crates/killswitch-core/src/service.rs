//! Kill-Switch Service: the per-key `INACTIVE <-> ACTIVE` state machine.
//!
//! Mutations follow one path: authorize, read, compare-and-set, and on success
//! publish to watchers and append to the audit log. A version conflict means
//! another writer committed first; the service re-reads and tries again up to
//! `max_attempts` times before reporting `Contention`. A failed mutation never
//! leaves a partial write behind.
//!
//! The whole path runs under the key's commit lock, so a key's audit entries
//! are appended in version order.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::audit::{self, AuditReport, Check, CheckRegistry, Outcome};
use crate::audit_log::{AuditEntry, AuditLog, ToggleEvent};
use crate::broker::{Subscription, WatchBroker};
use crate::commit::{self, CommitLocks};
use crate::config::Config;
use crate::error::{KillSwitchError, Result, StoreError};
use crate::policy::{AuthorizationPolicy, Decision, ANY_KEY};
use crate::store::StateStore;
use crate::types::{validate_key, Action, PrincipalId, SwitchRecord, SwitchState};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Operator banner for one switch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchStatus {
    pub key: String,
    pub state: SwitchState,
    pub banner: &'static str,
    pub record: SwitchRecord,
}

pub struct KillSwitchService {
    store: Arc<dyn StateStore>,
    broker: WatchBroker,
    policy: Arc<dyn AuthorizationPolicy>,
    audit_log: Arc<dyn AuditLog>,
    checks: CheckRegistry,
    locks: Arc<CommitLocks>,
    max_attempts: u32,
    latest_report: RwLock<Option<AuditReport>>,
}

impl KillSwitchService {
    /// Wire a service over explicit collaborators. The built-in audit checks
    /// are registered against the same store and log.
    pub fn new(
        store: Arc<dyn StateStore>,
        policy: Arc<dyn AuthorizationPolicy>,
        audit_log: Arc<dyn AuditLog>,
    ) -> Self {
        let locks = Arc::new(CommitLocks::new());
        let checks = CheckRegistry::with_builtins(
            Arc::clone(&store),
            Arc::clone(&audit_log),
            Arc::clone(&locks),
        );
        Self {
            store,
            broker: WatchBroker::new(),
            policy,
            audit_log,
            checks,
            locks,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            latest_report: RwLock::new(None),
        }
    }

    /// Build from configuration; relative paths resolve against `base`.
    /// Seeds `config.default_key`.
    pub fn from_config(config: &Config, base: &Path) -> Result<Self> {
        let store = config.store.open(base, &config.namespace)?;
        let audit_log = config.audit_log.open(base)?;
        let service = Self::new(store, config.policy.build(), audit_log)
            .with_max_attempts(config.toggle.max_attempts);
        let seeded = service.get(&config.default_key)?;
        tracing::info!(
            key = %seeded.key,
            active = seeded.active,
            version = seeded.version,
            namespace = %config.namespace,
            policy = service.policy.name(),
            "kill-switch service ready"
        );
        Ok(service)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_check(mut self, check: Arc<dyn Check>) -> Self {
        self.checks.register(check);
        self
    }

    pub fn broker(&self) -> &WatchBroker {
        &self.broker
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks.names()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current record for `key`, creating the inactive version-0 record on
    /// first access.
    pub fn get(&self, key: &str) -> Result<SwitchRecord> {
        validate_key(key)?;
        match self.store.get(key) {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound(_)) => {
                let record = self
                    .store
                    .create_if_absent(key, SwitchRecord::initial(key))?;
                tracing::info!(%key, "switch created");
                Ok(record)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<SwitchRecord>> {
        Ok(self.store.list()?)
    }

    pub fn status(&self, key: &str) -> Result<SwitchStatus> {
        let record = self.get(key)?;
        let state = record.state();
        Ok(SwitchStatus {
            key: record.key.clone(),
            state,
            banner: state.banner(),
            record,
        })
    }

    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        self.audit_log.entries()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Flip `key` on behalf of `principal`.
    pub fn toggle(&self, key: &str, principal: &PrincipalId) -> Result<SwitchRecord> {
        self.mutate(key, principal, |current| Some(!current.active))
    }

    /// Drive `key` to `active`. A switch already in that state is returned
    /// unchanged: no version bump, no publish, no audit entry.
    pub fn set(&self, key: &str, active: bool, principal: &PrincipalId) -> Result<SwitchRecord> {
        self.mutate(key, principal, |current| {
            (current.active != active).then_some(active)
        })
    }

    /// `decide` maps the current record to the desired state, or `None` when
    /// there is nothing to write.
    fn mutate<F>(&self, key: &str, principal: &PrincipalId, decide: F) -> Result<SwitchRecord>
    where
        F: Fn(&SwitchRecord) -> Option<bool>,
    {
        validate_key(key)?;
        self.authorize(principal, key, Action::Toggle)?;

        let _gate = self.locks.enter();
        let key_lock = self.locks.key(key);
        let _held = commit::hold(&key_lock);

        for attempt in 1..=self.max_attempts {
            let current = self.get(key)?;
            let Some(target) = decide(&current) else {
                return Ok(current);
            };
            match self
                .store
                .compare_and_set(key, current.version, target, principal)
            {
                Ok(next) => {
                    self.committed(&current, &next, principal);
                    return Ok(next);
                }
                Err(StoreError::VersionConflict {
                    expected, actual, ..
                }) => {
                    tracing::debug!(%key, attempt, expected, actual, "compare-and-set lost race; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(%key, principal = %principal, attempts = self.max_attempts, "toggle gave up under contention");
        Err(KillSwitchError::Contention {
            key: key.to_string(),
            attempts: self.max_attempts,
        })
    }

    fn authorize(&self, principal: &PrincipalId, key: &str, action: Action) -> Result<()> {
        match self.policy.authorize(principal, key, action) {
            Decision::Granted => Ok(()),
            Decision::Denied { reason } => {
                tracing::warn!(%key, principal = %principal, %action, %reason, "authorization denied");
                Err(KillSwitchError::Unauthorized {
                    principal: principal.to_string(),
                    key: key.to_string(),
                    action: action.to_string(),
                    reason,
                })
            }
        }
    }

    /// After-commit side effects. The write is already durable, so failures
    /// here are logged and never turn the mutation into an error.
    fn committed(&self, from: &SwitchRecord, to: &SwitchRecord, principal: &PrincipalId) {
        tracing::info!(
            key = %to.key,
            principal = %principal,
            from = %from.state(),
            to = %to.state(),
            version = to.version,
            "switch changed"
        );
        self.broker.publish(to.clone());
        let event = ToggleEvent {
            principal: principal.clone(),
            key: to.key.clone(),
            from_state: from.state(),
            to_state: to.state(),
            version: to.version,
            timestamp: to.updated_at,
        };
        if let Err(e) = self.audit_log.append(event) {
            tracing::error!(key = %to.key, version = to.version, error = %e, "audit log append failed");
        }
    }

    // -----------------------------------------------------------------------
    // Watch
    // -----------------------------------------------------------------------

    /// Live feed of `key`, starting with its current state.
    pub fn watch(&self, key: &str) -> Result<Subscription> {
        let current = self.get(key)?;
        let subscription = self.broker.subscribe(current);
        // A commit between the read above and registration would have found no
        // channel to publish to; re-read now that the channel exists.
        let fresh = self.store.get(key)?;
        self.broker.publish(fresh);
        Ok(subscription)
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    /// Run the named checks in order on behalf of `principal`.
    pub fn run_audit(&self, names: &[String], principal: &PrincipalId) -> Result<AuditReport> {
        self.authorize(principal, ANY_KEY, Action::RunAudit)?;
        let report = audit::run(&self.checks.resolve(names));
        tracing::info!(
            run_id = %report.run_id(),
            principal = %principal,
            checks = report.checks().len(),
            failed = report.count(Outcome::Fail),
            pending = report.count(Outcome::Pending),
            passed = report.passed(),
            "audit run sealed"
        );
        if let Ok(mut latest) = self.latest_report.write() {
            *latest = Some(report.clone());
        }
        Ok(report)
    }

    pub fn latest_report(&self) -> Option<AuditReport> {
        self.latest_report.read().ok().and_then(|r| r.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
