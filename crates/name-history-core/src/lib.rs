//! Reconciles name-history snapshots and synchronizes them into a history store.

mod batch;
mod error;
mod identifier;
mod record;
mod snapshot;
mod store;
mod sync;

pub use batch::{
    BatchConfig, BatchDriver, BatchEvent, BatchReport, IdentifierFailure, InputReport,
    StoreErrorPolicy, SyncProgress, DEFAULT_SOURCE, MERGED_INPUT_LABEL,
};
pub use error::{HistoryError, StoreError};
pub use identifier::Identifier;
pub use record::{sort_history, RawRecord, Record};
pub use snapshot::{merge, merge_all, Snapshot};
pub use store::HistoryStore;
pub use sync::{HistorySynchronizer, SyncOutcome};
