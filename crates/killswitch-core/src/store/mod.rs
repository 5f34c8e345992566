//! State Store: one versioned boolean record per switch key.
//!
//! `compare_and_set` is the only mutation point in the system. Implementations
//! must apply it atomically per key: the expected version is compared and the
//! successor written without any other writer interleaving. No implementation
//! retries on its own; the service owns the retry policy.

pub mod db;
pub mod memory;

pub use db::RedbStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::types::{PrincipalId, SwitchRecord};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait StateStore: Send + Sync {
    /// Current record for `key`, or `StoreError::NotFound`.
    fn get(&self, key: &str) -> StoreResult<SwitchRecord>;

    /// Insert `initial` under `key` unless a record already exists, and return
    /// whichever record is stored afterwards.
    fn create_if_absent(&self, key: &str, initial: SwitchRecord) -> StoreResult<SwitchRecord>;

    /// Write `new_active` iff the stored version equals `expected_version`.
    ///
    /// On success the returned record has `version = expected_version + 1`,
    /// `last_actor = actor` and a fresh `updated_at`. On mismatch nothing is
    /// written and `StoreError::VersionConflict` is returned.
    fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        new_active: bool,
        actor: &PrincipalId,
    ) -> StoreResult<SwitchRecord>;

    /// All records, ordered by key.
    fn list(&self) -> StoreResult<Vec<SwitchRecord>>;
}
