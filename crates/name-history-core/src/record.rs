use serde::Serialize;
use serde_json::{Map, Value};

use crate::HistoryError;

/// One name-change object exactly as it appeared in a loaded snapshot.
pub type RawRecord = Map<String, Value>;

/// A single name-change event in an identifier's history.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct Record {
    pub name: String,
    #[serde(rename = "changedToAt", skip_serializing_if = "Option::is_none")]
    pub changed_to_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<i64>,
}

impl Record {
    /// Normalize a freshly loaded object, attributing it to `source_tag`.
    ///
    /// Any `source` embedded in `object` is ignored.
    ///
    /// # Errors
    /// Returns [`HistoryError::MissingField`] when `name` is absent or null and
    /// [`HistoryError::InvalidField`] when `name` or `changedToAt` has the wrong JSON type.
    pub fn from_loaded_object(object: &RawRecord, source_tag: i64) -> Result<Self, HistoryError> {
        let name = match object.get("name") {
            None | Some(Value::Null) => return Err(HistoryError::MissingField { field: "name" }),
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(HistoryError::InvalidField {
                    field: "name",
                    reason: format!("expected a string, found {other}"),
                })
            }
        };

        let changed_to_at = match object.get("changedToAt") {
            None | Some(Value::Null) => None,
            Some(Value::Number(number)) => {
                Some(number.as_i64().ok_or_else(|| HistoryError::InvalidField {
                    field: "changedToAt",
                    reason: format!("expected an integer timestamp, found {number}"),
                })?)
            }
            Some(other) => {
                return Err(HistoryError::InvalidField {
                    field: "changedToAt",
                    reason: format!("expected an integer timestamp, found {other}"),
                })
            }
        };

        Ok(Self { name, changed_to_at, source: Some(source_tag) })
    }

    #[must_use]
    pub fn from_store_row(name: String, changed_to_at: Option<i64>, source: Option<i64>) -> Self {
        Self { name, changed_to_at, source }
    }

    /// Ordering key within a history. An unknown change time sorts as 0.
    #[must_use]
    pub fn sort_key(&self) -> i64 {
        self.changed_to_at.unwrap_or(0)
    }
}

/// Stable sort of one identifier's history by [`Record::sort_key`].
pub fn sort_history(records: &mut [Record]) {
    records.sort_by_key(Record::sort_key);
}
