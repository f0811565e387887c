use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};

use crate::{HistoryError, RawRecord};

#[derive(Debug, Deserialize)]
struct SnapshotDocument {
    uuid: String,
    names: Vec<RawRecord>,
}

#[derive(Serialize)]
struct SnapshotDocumentRef<'a> {
    uuid: &'a str,
    names: &'a [RawRecord],
}

/// One input's identifier text to raw name-change records, in first-seen order.
///
/// Inserting an identifier that is already present replaces its records but keeps its position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<(String, Vec<RawRecord>)>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot file: a JSON array of `{"uuid": ..., "names": [...]}` documents.
    ///
    /// # Errors
    /// Returns [`HistoryError::Load`] when the file cannot be opened or decoded.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        let file = File::open(path).map_err(|err| {
            HistoryError::Load(format!("failed to open {}: {err}", path.display()))
        })?;
        Self::from_reader(BufReader::new(file))
            .map_err(|err| HistoryError::Load(format!("{}: {err}", path.display())))
    }

    /// Decode a snapshot from any JSON reader.
    ///
    /// # Errors
    /// Returns [`HistoryError::Load`] when the input is not a valid snapshot document array.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, HistoryError> {
        let documents: Vec<SnapshotDocument> = serde_json::from_reader(reader)
            .map_err(|err| HistoryError::Load(format!("invalid snapshot JSON: {err}")))?;

        let mut snapshot = Self::new();
        for document in documents {
            snapshot.insert(document.uuid, document.names);
        }
        Ok(snapshot)
    }

    /// Insert or replace the records for `uuid`. Returns the replaced records, if any.
    pub fn insert(&mut self, uuid: String, names: Vec<RawRecord>) -> Option<Vec<RawRecord>> {
        if let Some(&position) = self.index.get(&uuid) {
            return Some(std::mem::replace(&mut self.entries[position].1, names));
        }
        self.index.insert(uuid.clone(), self.entries.len());
        self.entries.push((uuid, names));
        None
    }

    #[must_use]
    pub fn get(&self, uuid: &str) -> Option<&[RawRecord]> {
        self.index.get(uuid).map(|&position| self.entries[position].1.as_slice())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RawRecord])> {
        self.entries.iter().map(|(uuid, names)| (uuid.as_str(), names.as_slice()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(uuid, _)| uuid.as_str())
    }
}

impl Serialize for Snapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
        for (uuid, names) in &self.entries {
            seq.serialize_element(&SnapshotDocumentRef { uuid, names })?;
        }
        seq.end()
    }
}

/// Combine two snapshots, keeping the longer record sequence per identifier.
///
/// Ties keep `base`'s sequence. Identifiers new to `base` are appended in `incoming` order.
#[must_use]
pub fn merge(mut base: Snapshot, incoming: Snapshot) -> Snapshot {
    for (uuid, names) in incoming.entries {
        match base.index.get(&uuid) {
            Some(&position) => {
                let current = &mut base.entries[position].1;
                if current.len() < names.len() {
                    *current = names;
                }
            }
            None => {
                base.insert(uuid, names);
            }
        }
    }
    base
}

/// Left fold of [`merge`] over any number of snapshots.
#[must_use]
pub fn merge_all<I>(snapshots: I) -> Snapshot
where
    I: IntoIterator<Item = Snapshot>,
{
    snapshots.into_iter().fold(Snapshot::new(), merge)
}
