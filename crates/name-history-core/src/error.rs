/// Failure reported by a [`crate::HistoryStore`] implementation.
pub type StoreError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("malformed identifier `{text}`: {reason}")]
    MalformedIdentifier { text: String, reason: String },
    #[error("record is missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("record field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("failed to load snapshot: {0}")]
    Load(String),
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl HistoryError {
    /// Errors that abort the whole input regardless of the configured store policy.
    #[must_use]
    pub fn aborts_input(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

impl From<StoreError> for HistoryError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
