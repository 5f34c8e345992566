//! Audit Pipeline: runs named checks in order and seals a report.
//!
//! The pipeline never decides outcomes itself. It sequences the checks it is
//! given, times each one and records what the check reported. A check that
//! returns an error or panics is recorded as `FAIL` with the fault text and
//! the run continues with the next check.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit_log::{verify_chain, AuditEntry, AuditLog};
use crate::commit::CommitLocks;
use crate::store::StateStore;
use crate::types::SwitchRecord;

// ---------------------------------------------------------------------------
// Outcome / Finding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pass,
    Fail,
    Pending,
}

/// What a check reports back to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub outcome: Outcome,
    pub detail: String,
}

impl Finding {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Pass,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Fail,
            detail: detail.into(),
        }
    }

    pub fn pending(detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Pending,
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

pub trait Check: Send + Sync {
    fn name(&self) -> &str;

    /// Run the check. An `Err` is a fault in the check itself, not a failed
    /// verdict; the pipeline records it as `FAIL`.
    fn run(&self) -> anyhow::Result<Finding>;
}

/// A check backed by a closure.
pub struct FnCheck<F> {
    name: String,
    f: F,
}

impl<F> Check for FnCheck<F>
where
    F: Fn() -> anyhow::Result<Finding> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> anyhow::Result<Finding> {
        (self.f)()
    }
}

pub fn check_fn<F>(name: impl Into<String>, f: F) -> Arc<dyn Check>
where
    F: Fn() -> anyhow::Result<Finding> + Send + Sync + 'static,
{
    Arc::new(FnCheck {
        name: name.into(),
        f,
    })
}

/// Stand-in for a requested name nobody registered.
struct Unregistered(String);

impl Check for Unregistered {
    fn name(&self) -> &str {
        &self.0
    }

    fn run(&self) -> anyhow::Result<Finding> {
        anyhow::bail!("no check registered under '{}'", self.0)
    }
}

// ---------------------------------------------------------------------------
// AuditReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckEntry {
    pub name: String,
    pub outcome: Outcome,
    pub detail: String,
    pub duration_ms: u64,
}

/// Result of one pipeline run. Append-only while open, immutable once sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    checks: Vec<CheckEntry>,
    completed_at: Option<DateTime<Utc>>,
}

impl AuditReport {
    fn open() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            checks: Vec::new(),
            completed_at: None,
        }
    }

    fn record(&mut self, entry: CheckEntry) {
        debug_assert!(!self.is_sealed(), "record on a sealed report");
        if !self.is_sealed() {
            self.checks.push(entry);
        }
    }

    fn seal(&mut self) {
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn checks(&self) -> &[CheckEntry] {
        &self.checks
    }

    pub fn is_sealed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// True when every check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.outcome == Outcome::Pass)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.checks.iter().filter(|c| c.outcome == outcome).count()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "check panicked".to_string()
    }
}

/// Run `checks` in order and return the sealed report.
pub fn run(checks: &[Arc<dyn Check>]) -> AuditReport {
    let mut report = AuditReport::open();
    for check in checks {
        let started = Instant::now();
        let finding = match catch_unwind(AssertUnwindSafe(|| check.run())) {
            Ok(Ok(finding)) => finding,
            Ok(Err(e)) => Finding::fail(format!("check fault: {e:#}")),
            Err(payload) => Finding::fail(format!("check panicked: {}", panic_text(&*payload))),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            check = check.name(),
            outcome = ?finding.outcome,
            duration_ms,
            "audit check finished"
        );
        report.record(CheckEntry {
            name: check.name().to_string(),
            outcome: finding.outcome,
            detail: finding.detail,
            duration_ms,
        });
    }
    report.seal();
    report
}

// ---------------------------------------------------------------------------
// CheckRegistry
// ---------------------------------------------------------------------------

/// Named checks available to callers that only know check names.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: BTreeMap<String, Arc<dyn Check>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `switch_state`, `genesis_integrity` and
    /// `ledger_consistency`.
    /// `ledger_consistency` quiesces writers through `locks` while it reads.
    pub fn with_builtins(
        store: Arc<dyn StateStore>,
        log: Arc<dyn AuditLog>,
        locks: Arc<CommitLocks>,
    ) -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(SwitchStateCheck {
            store: Arc::clone(&store),
        }));
        reg.register(Arc::new(GenesisIntegrityCheck {
            log: Arc::clone(&log),
        }));
        reg.register(Arc::new(LedgerConsistencyCheck { store, log, locks }));
        reg
    }

    /// Add or replace a check under its own name.
    pub fn register(&mut self, check: Arc<dyn Check>) {
        self.checks.insert(check.name().to_string(), check);
    }

    pub fn names(&self) -> Vec<String> {
        self.checks.keys().cloned().collect()
    }

    /// Map names to checks, preserving order. Unknown names resolve to a check
    /// that faults, so they show up in the report as `FAIL`.
    pub fn resolve(&self, names: &[String]) -> Vec<Arc<dyn Check>> {
        names
            .iter()
            .map(|name| match self.checks.get(name) {
                Some(check) => Arc::clone(check),
                None => Arc::new(Unregistered(name.clone())) as Arc<dyn Check>,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Built-in checks
// ---------------------------------------------------------------------------

/// PASS when no switch is engaged.
pub struct SwitchStateCheck {
    store: Arc<dyn StateStore>,
}

impl Check for SwitchStateCheck {
    fn name(&self) -> &str {
        "switch_state"
    }

    fn run(&self) -> anyhow::Result<Finding> {
        let records = self.store.list()?;
        let active: Vec<&str> = records
            .iter()
            .filter(|r| r.active)
            .map(|r| r.key.as_str())
            .collect();
        if active.is_empty() {
            Ok(Finding::pass(format!(
                "{} switch(es) inactive: nominal operation",
                records.len()
            )))
        } else {
            Ok(Finding::fail(format!(
                "emergency shutdown active on: {}",
                active.join(", ")
            )))
        }
    }
}

/// Verifies the audit-log hash chain from genesis.
pub struct GenesisIntegrityCheck {
    log: Arc<dyn AuditLog>,
}

impl Check for GenesisIntegrityCheck {
    fn name(&self) -> &str {
        "genesis_integrity"
    }

    fn run(&self) -> anyhow::Result<Finding> {
        let entries = self.log.entries()?;
        if entries.is_empty() {
            return Ok(Finding::pending("audit log is empty; nothing chained yet"));
        }
        Ok(match verify_chain(&entries) {
            Ok(()) => Finding::pass(format!("{} entries chain from genesis", entries.len())),
            Err(brk) => Finding::fail(format!("chain broken at seq {}: {}", brk.seq, brk.reason)),
        })
    }
}

/// Each switch's version and state agree with the audit log.
pub struct LedgerConsistencyCheck {
    store: Arc<dyn StateStore>,
    log: Arc<dyn AuditLog>,
    locks: Arc<CommitLocks>,
}

impl LedgerConsistencyCheck {
    /// Problems between one record and its log entries. The entries must
    /// cover versions `1..=record.version` exactly once each, and the
    /// highest-version entry must end at the stored state.
    fn reconcile(record: &SwitchRecord, mine: &[&AuditEntry]) -> Option<String> {
        let mut versions: Vec<u64> = mine.iter().map(|e| e.version).collect();
        versions.sort_unstable();
        if versions.len() as u64 != record.version {
            return Some(format!(
                "{}: version {} but {} log entries",
                record.key,
                record.version,
                versions.len()
            ));
        }
        if !versions.iter().copied().eq(1..=record.version) {
            return Some(format!(
                "{}: log versions {:?} do not cover 1..={}",
                record.key, versions, record.version
            ));
        }
        let latest = mine.iter().max_by_key(|e| e.version)?;
        (latest.to_state != record.state()).then(|| {
            format!(
                "{}: stored {} but log version {} ends at {}",
                record.key,
                record.state(),
                latest.version,
                latest.to_state
            )
        })
    }
}

impl Check for LedgerConsistencyCheck {
    fn name(&self) -> &str {
        "ledger_consistency"
    }

    fn run(&self) -> anyhow::Result<Finding> {
        let (records, entries) = {
            let _quiet = self.locks.quiesce();
            (self.store.list()?, self.log.entries()?)
        };

        let problems: Vec<String> = records
            .iter()
            .filter_map(|record| {
                let mine: Vec<&AuditEntry> =
                    entries.iter().filter(|e| e.key == record.key).collect();
                Self::reconcile(record, &mine)
            })
            .collect();

        if problems.is_empty() {
            Ok(Finding::pass(format!(
                "{} switch(es) agree with {} log entries",
                records.len(),
                entries.len()
            )))
        } else {
            Ok(Finding::fail(problems.join("; ")))
        }
    }
}
