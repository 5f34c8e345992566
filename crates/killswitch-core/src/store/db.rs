//! Durable switch store backed by redb.
//!
//! # Table design
//!
//! One table per namespace, named `switches/<namespace>`, keyed by the switch
//! key (UTF-8) with a JSON-encoded [`SwitchRecord`] as value. Namespaces
//! sharing a database file never see each other's switches. Every compare-and-set runs inside
//! one write transaction: read, compare version, write successor, commit.
//! redb admits one write transaction at a time, so the version check and the
//! write can never interleave with another writer.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use super::{StateStore, StoreResult};
use crate::error::StoreError;
use crate::types::{PrincipalId, SwitchRecord};

// ---------------------------------------------------------------------------
// Table definition
// ---------------------------------------------------------------------------

const TABLE_PREFIX: &str = "switches";

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode(bytes: &[u8]) -> StoreResult<SwitchRecord> {
    serde_json::from_slice(bytes).map_err(db_err)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
    table: String,
}

impl RedbStore {
    /// Open or create the redb database at `path`, scoped to `namespace`.
    ///
    /// Creates the namespace's table if it doesn't already exist.
    pub fn open(path: &Path, namespace: &str) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(db_err)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let store = Self {
            db,
            table: format!("{TABLE_PREFIX}/{namespace}"),
        };
        // Ensure the table exists before any reads
        let wt = store.db.begin_write().map_err(db_err)?;
        wt.open_table(store.switches()).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(store)
    }

    /// Key: switch key
    /// Value: JSON-encoded SwitchRecord
    fn switches(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }
}

impl StateStore for RedbStore {
    fn get(&self, key: &str) -> StoreResult<SwitchRecord> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(self.switches()).map_err(db_err)?;
        let guard = table
            .get(key)
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let record = decode(guard.value())?;
        Ok(record)
    }

    fn create_if_absent(&self, key: &str, initial: SwitchRecord) -> StoreResult<SwitchRecord> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let stored = {
            let mut table = wt.open_table(self.switches()).map_err(db_err)?;
            let existing = match table.get(key).map_err(db_err)? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match existing {
                Some(record) => record,
                None => {
                    let record = SwitchRecord {
                        key: key.to_string(),
                        ..initial
                    };
                    let value = serde_json::to_vec(&record).map_err(db_err)?;
                    table.insert(key, value.as_slice()).map_err(db_err)?;
                    record
                }
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(stored)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        new_active: bool,
        actor: &PrincipalId,
    ) -> StoreResult<SwitchRecord> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let next = {
            let mut table = wt.open_table(self.switches()).map_err(db_err)?;
            let current = match table.get(key).map_err(db_err)? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StoreError::NotFound(key.to_string())),
            };
            if current.version != expected_version {
                // Dropping `wt` without commit aborts the transaction.
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                    expected: expected_version,
                    actual: current.version,
                });
            }
            let next = current.next(new_active, actor);
            let value = serde_json::to_vec(&next).map_err(db_err)?;
            table.insert(key, value.as_slice()).map_err(db_err)?;
            next
        };
        wt.commit().map_err(db_err)?;
        Ok(next)
    }

    fn list(&self) -> StoreResult<Vec<SwitchRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(self.switches()).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(decode(v.value())?);
        }
        // redb iterates in key order already.
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, RedbStore) {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(&dir.path().join("switches.redb"), "default-app-id").unwrap();
        (dir, store)
    }

    #[test]
    fn empty_db_get_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(store.get("global"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn create_then_toggle_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("switches.redb");
        {
            let store = RedbStore::open(&path, "default-app-id").unwrap();
            store
                .create_if_absent("global", SwitchRecord::initial("global"))
                .unwrap();
            store
                .compare_and_set("global", 0, true, &PrincipalId::new("alice"))
                .unwrap();
        }
        let reopened = RedbStore::open(&path, "default-app-id").unwrap();
        let rec = reopened.get("global").unwrap();
        assert!(rec.active);
        assert_eq!(rec.version, 1);
        assert_eq!(rec.last_actor.as_str(), "alice");
    }

    #[test]
    fn stale_version_conflicts_without_writing() {
        let (_dir, store) = open_tmp();
        store
            .create_if_absent("global", SwitchRecord::initial("global"))
            .unwrap();
        store
            .compare_and_set("global", 0, true, &PrincipalId::new("alice"))
            .unwrap();
        let before = store.get("global").unwrap();

        let err = store
            .compare_and_set("global", 0, false, &PrincipalId::new("bob"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(store.get("global").unwrap(), before);
    }

    #[test]
    fn create_if_absent_does_not_reset_existing() {
        let (_dir, store) = open_tmp();
        store
            .create_if_absent("global", SwitchRecord::initial("global"))
            .unwrap();
        store
            .compare_and_set("global", 0, true, &PrincipalId::new("alice"))
            .unwrap();
        let rec = store
            .create_if_absent("global", SwitchRecord::initial("global"))
            .unwrap();
        assert_eq!(rec.version, 1);
    }

    #[test]
    fn list_returns_all_in_key_order() {
        let (_dir, store) = open_tmp();
        for key in ["b", "a", "c"] {
            store.create_if_absent(key, SwitchRecord::initial(key)).unwrap();
        }
        let keys: Vec<String> = store.list().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn namespaces_in_one_file_are_isolated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("switches.redb");
        {
            let checkout = RedbStore::open(&path, "checkout").unwrap();
            checkout
                .create_if_absent("global", SwitchRecord::initial("global"))
                .unwrap();
            checkout
                .compare_and_set("global", 0, true, &PrincipalId::new("alice"))
                .unwrap();
        }

        let search = RedbStore::open(&path, "search").unwrap();
        assert!(matches!(search.get("global"), Err(StoreError::NotFound(_))));
        assert!(search.list().unwrap().is_empty());
        drop(search);

        let checkout = RedbStore::open(&path, "checkout").unwrap();
        assert!(checkout.get("global").unwrap().active);
    }
}
