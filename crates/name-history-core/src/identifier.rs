use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::HistoryError;

/// 128-bit identifier of one tracked entity.
///
/// The store keys rows by [`Identifier::to_binary_key`], so the byte layout must never change
/// for a given textual form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Identifier(pub Uuid);

impl Identifier {
    /// Parse an identifier from any textual form accepted by `uuid`
    /// (hyphenated, simple, braced or urn).
    ///
    /// # Errors
    /// Returns [`HistoryError::MalformedIdentifier`] when `text` is not a 128-bit identifier.
    pub fn parse(text: &str) -> Result<Self, HistoryError> {
        Uuid::parse_str(text).map(Self).map_err(|err| HistoryError::MalformedIdentifier {
            text: text.to_string(),
            reason: err.to_string(),
        })
    }

    #[must_use]
    pub fn to_binary_key(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    #[must_use]
    pub fn from_binary_key(key: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(key))
    }
}

impl FromStr for Identifier {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(text: &str) -> Identifier {
        match Identifier::parse(text) {
            Ok(id) => id,
            Err(err) => panic!("invalid fixture identifier {text}: {err}"),
        }
    }

    #[test]
    fn parse_accepts_hyphenated_and_simple_forms() {
        let hyphenated = fixture("4566e69f-c907-48ee-8d71-d7ba5aa00d20");
        let simple = fixture("4566e69fc90748ee8d71d7ba5aa00d20");

        assert_eq!(hyphenated, simple);
        assert_eq!(simple.to_string(), "4566e69f-c907-48ee-8d71-d7ba5aa00d20");
    }

    #[test]
    fn parse_rejects_malformed_text() {
        let err = match Identifier::parse("not-a-uuid") {
            Ok(id) => panic!("expected malformed identifier, got {id}"),
            Err(err) => err,
        };

        assert!(matches!(
            err,
            HistoryError::MalformedIdentifier { ref text, .. } if text == "not-a-uuid"
        ));
    }

    #[test]
    fn binary_key_is_big_endian_and_reversible() {
        let id = fixture("00000000-0000-0000-0000-000000000001");
        let key = id.to_binary_key();

        let mut expected = [0_u8; 16];
        expected[15] = 1;
        assert_eq!(key, expected);
        assert_eq!(Identifier::from_binary_key(key), id);
        assert_eq!(fixture(&id.to_string()).to_binary_key(), key);
    }

    #[test]
    fn uppercase_text_maps_to_same_key() {
        let lower = fixture("4566e69f-c907-48ee-8d71-d7ba5aa00d20");
        let upper = fixture("4566E69F-C907-48EE-8D71-D7BA5AA00D20");

        assert_eq!(lower.to_binary_key(), upper.to_binary_key());
    }
}
