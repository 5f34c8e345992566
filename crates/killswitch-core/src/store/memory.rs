use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::{StateStore, StoreResult};
use crate::error::StoreError;
use crate::types::{PrincipalId, SwitchRecord};

type Cell = Arc<Mutex<SwitchRecord>>;

/// In-process store with per-key locking.
///
/// The outer map lock is held only long enough to find or insert a key's cell.
/// Compare-and-set runs under that key's own mutex, so writers on different
/// keys never contend and readers of one key wait at most for one CAS window.
#[derive(Default)]
pub struct MemoryStore {
    cells: RwLock<HashMap<String, Cell>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".into())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &str) -> StoreResult<Cell> {
        let cells = self.cells.read().map_err(poisoned)?;
        cells
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<SwitchRecord> {
        let cell = self.cell(key)?;
        let record = cell.lock().map_err(poisoned)?;
        Ok(record.clone())
    }

    fn create_if_absent(&self, key: &str, initial: SwitchRecord) -> StoreResult<SwitchRecord> {
        if let Ok(existing) = self.get(key) {
            return Ok(existing);
        }
        let cell = {
            let mut cells = self.cells.write().map_err(poisoned)?;
            cells
                .entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(SwitchRecord {
                        key: key.to_string(),
                        ..initial
                    }))
                })
                .clone()
        };
        let record = cell.lock().map_err(poisoned)?;
        Ok(record.clone())
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        new_active: bool,
        actor: &PrincipalId,
    ) -> StoreResult<SwitchRecord> {
        let cell = self.cell(key)?;
        let mut record = cell.lock().map_err(poisoned)?;
        if record.version != expected_version {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: record.version,
            });
        }
        *record = record.next(new_active, actor);
        Ok(record.clone())
    }

    fn list(&self) -> StoreResult<Vec<SwitchRecord>> {
        let cells: Vec<Cell> = {
            let map = self.cells.read().map_err(poisoned)?;
            map.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().map_err(poisoned)?.clone());
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}
