//! `killswitch-core`: versioned kill-switch coordination.
//!
//! ```text
//! KillSwitchService
//!     ├── AuthorizationPolicy   allow_all | root_authority | allow_list
//!     ├── StateStore            MemoryStore | RedbStore (compare-and-set)
//!     ├── WatchBroker           per-key watch channel, last-value-wins
//!     ├── AuditLog              hash-chained toggle history
//!     ├── CommitLocks           per-key commit order, quiesce for readers
//!     └── CheckRegistry         named checks for the audit pipeline
//! ```

pub mod audit;
pub mod audit_log;
pub mod broker;
pub mod commit;
pub mod config;
pub mod error;
pub mod io;
pub mod policy;
pub mod service;
pub mod store;
pub mod types;

pub use error::{KillSwitchError, Result, StoreError};
pub use service::KillSwitchService;
pub use types::{Action, PrincipalId, SwitchRecord, SwitchState};
