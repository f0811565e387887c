use serde::Serialize;

use crate::{HistoryError, HistoryStore, Identifier, RawRecord, Record};

/// Result of synchronizing one identifier.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The store already held history; nothing was written.
    Skipped { existing: usize },
    /// The store held no history and the candidate records were written.
    Inserted { count: usize },
}

impl SyncOutcome {
    #[must_use]
    pub fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted { .. })
    }

    /// Rows persisted for the identifier once this outcome is committed.
    #[must_use]
    pub fn rows(self) -> usize {
        match self {
            Self::Skipped { existing } => existing,
            Self::Inserted { count } => count,
        }
    }
}

/// Fills empty identifier histories from snapshot records.
///
/// Any pre-existing row blocks insertion entirely: partial histories are never topped up.
#[derive(Debug, Clone, Copy)]
pub struct HistorySynchronizer {
    source: i64,
}

impl HistorySynchronizer {
    #[must_use]
    pub fn new(source: i64) -> Self {
        Self { source }
    }

    /// Synchronize one identifier against `store`.
    ///
    /// Candidates are normalized only when the stored history is empty, and every inserted row
    /// is attributed to this synchronizer's source tag.
    ///
    /// # Errors
    /// Returns [`HistoryError::Store`] on read, insert or commit failure and
    /// [`HistoryError::MissingField`] / [`HistoryError::InvalidField`] for a bad candidate.
    pub fn sync<S>(
        &self,
        identifier: &Identifier,
        candidates: &[RawRecord],
        store: &mut S,
    ) -> Result<SyncOutcome, HistoryError>
    where
        S: HistoryStore + ?Sized,
    {
        let existing = store.name_history(identifier)?;
        if !existing.is_empty() {
            tracing::debug!(%identifier, existing = existing.len(), "history present, skipping");
            return Ok(SyncOutcome::Skipped { existing: existing.len() });
        }

        let records = candidates
            .iter()
            .map(|candidate| Record::from_loaded_object(candidate, self.source))
            .collect::<Result<Vec<_>, _>>()?;

        let count = store.insert_history(identifier, &records)?;
        store.commit()?;
        tracing::debug!(%identifier, count, source = self.source, "inserted history");
        Ok(SyncOutcome::Inserted { count })
    }
}
