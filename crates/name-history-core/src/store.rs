use crate::{Identifier, Record, StoreError};

/// Keyed, ordered name-history storage used by the synchronizer.
///
/// Implementations are used strictly sequentially from one thread.
pub trait HistoryStore {
    /// Persisted history of `identifier`, ascending by change time with unknown times sorted as 0.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the history cannot be read.
    fn name_history(&self, identifier: &Identifier) -> Result<Vec<Record>, StoreError>;

    /// Insert every record for `identifier` as a single all-or-nothing unit of work.
    ///
    /// The rows become durable at the next [`HistoryStore::commit`].
    ///
    /// # Errors
    /// Returns a [`StoreError`] when any row cannot be written; none of them are kept.
    fn insert_history(
        &mut self,
        identifier: &Identifier,
        records: &[Record],
    ) -> Result<usize, StoreError>;

    /// Make all pending writes durable. A no-op when nothing is pending.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the commit fails; the pending writes are discarded.
    fn commit(&mut self) -> Result<(), StoreError>;
}
