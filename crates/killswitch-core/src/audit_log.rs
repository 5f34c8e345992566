//! Append-only, hash-chained log of accepted switch mutations.
//!
//! Every entry commits to its predecessor: `hash = sha256(json(canonical))`
//! where the canonical form includes `prev_hash`. The first entry chains from
//! [`GENESIS_HASH`]. [`verify_chain`] walks the log and reports the first
//! entry whose sequence number, link or digest does not check out.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KillSwitchError, Result};
use crate::types::{PrincipalId, SwitchState};

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// What the service hands the log after a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleEvent {
    pub principal: PrincipalId,
    pub key: String,
    pub from_state: SwitchState,
    pub to_state: SwitchState,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub seq: u64,
    pub principal: PrincipalId,
    pub key: String,
    pub from_state: SwitchState,
    pub to_state: SwitchState,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Serialize)]
struct Canonical<'a> {
    prev_hash: &'a str,
    seq: u64,
    principal: &'a str,
    key: &'a str,
    from_state: SwitchState,
    to_state: SwitchState,
    version: u64,
    timestamp: String,
}

#[allow(clippy::too_many_arguments)]
fn digest(
    prev_hash: &str,
    seq: u64,
    principal: &PrincipalId,
    key: &str,
    from_state: SwitchState,
    to_state: SwitchState,
    version: u64,
    timestamp: &DateTime<Utc>,
) -> String {
    let canonical = Canonical {
        prev_hash,
        seq,
        principal: principal.as_str(),
        key,
        from_state,
        to_state,
        version,
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
    };
    // Serializing a plain struct of strings and integers cannot fail.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

impl AuditEntry {
    fn chain(event: ToggleEvent, seq: u64, prev_hash: String) -> Self {
        let hash = digest(
            &prev_hash,
            seq,
            &event.principal,
            &event.key,
            event.from_state,
            event.to_state,
            event.version,
            &event.timestamp,
        );
        Self {
            seq,
            principal: event.principal,
            key: event.key,
            from_state: event.from_state,
            to_state: event.to_state,
            version: event.version,
            timestamp: event.timestamp,
            prev_hash,
            hash,
        }
    }

    fn expected_hash(&self) -> String {
        digest(
            &self.prev_hash,
            self.seq,
            &self.principal,
            &self.key,
            self.from_state,
            self.to_state,
            self.version,
            &self.timestamp,
        )
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub seq: u64,
    pub reason: String,
}

/// Check sequence numbers, links and digests from genesis onward.
pub fn verify_chain(entries: &[AuditEntry]) -> std::result::Result<(), ChainBreak> {
    let mut prev = GENESIS_HASH.to_string();
    for (i, entry) in entries.iter().enumerate() {
        let expected_seq = i as u64 + 1;
        if entry.seq != expected_seq {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: format!("expected seq {expected_seq}"),
            });
        }
        if entry.prev_hash != prev {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: "prev_hash does not link to predecessor".into(),
            });
        }
        if entry.hash != entry.expected_hash() {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: "hash does not match entry contents".into(),
            });
        }
        prev = entry.hash.clone();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

pub trait AuditLog: Send + Sync {
    /// Chain `event` onto the log and return the stored entry.
    fn append(&self, event: ToggleEvent) -> Result<AuditEntry>;

    /// Every entry, oldest first.
    fn entries(&self) -> Result<Vec<AuditEntry>>;
}

fn poisoned<T>(_: T) -> KillSwitchError {
    KillSwitchError::AuditLog("lock poisoned".into())
}

/// Tail of the chain: what the next append links to.
struct Head {
    seq: u64,
    hash: String,
}

impl Head {
    fn genesis() -> Self {
        Self {
            seq: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    fn after(entry: &AuditEntry) -> Self {
        Self {
            seq: entry.seq,
            hash: entry.hash.clone(),
        }
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, event: ToggleEvent) -> Result<AuditEntry> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let head = entries.last().map_or_else(Head::genesis, Head::after);
        let entry = AuditEntry::chain(event, head.seq + 1, head.hash);
        entries.push(entry.clone());
        Ok(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>> {
        Ok(self.entries.lock().map_err(poisoned)?.clone())
    }
}

/// JSON-lines file, one entry per line, fsynced per append.
pub struct FileAuditLog {
    path: PathBuf,
    head: Mutex<Head>,
}

impl FileAuditLog {
    /// Open (or lazily create) the log at `path`, resuming the chain from its
    /// last entry.
    pub fn open(path: &Path) -> Result<Self> {
        let head = match read_entries(path)?.last() {
            Some(last) => Head::after(last),
            None => Head::genesis(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            head: Mutex::new(head),
        })
    }
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for (n, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(line).map_err(|e| {
            KillSwitchError::AuditLog(format!("{}:{}: {e}", path.display(), n + 1))
        })?;
        out.push(entry);
    }
    Ok(out)
}

impl AuditLog for FileAuditLog {
    fn append(&self, event: ToggleEvent) -> Result<AuditEntry> {
        let mut head = self.head.lock().map_err(poisoned)?;
        let entry = AuditEntry::chain(event, head.seq + 1, head.hash.clone());
        let line = serde_json::to_string(&entry)?;
        crate::io::append_line(&self.path, &line)?;
        *head = Head::after(&entry);
        Ok(entry)
    }

    fn entries(&self) -> Result<Vec<AuditEntry>> {
        // Hold the head lock so a concurrent append is never half-read.
        let _head = self.head.lock().map_err(poisoned)?;
        read_entries(&self.path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
