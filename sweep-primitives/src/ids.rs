//! Model identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Identifier of a model (or model family) served by a backend, e.g. `gpt-4`.
///
/// Also used as the `llm` field of cached records and as the key of the
/// rate-limit table.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// Creates a model identifier after trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModelId`] when the identifier is empty.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let raw = id.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidModelId {
                id: raw,
                reason: "model id must not be empty".to_owned(),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ModelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ModelId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ModelId> for String {
    fn from(value: ModelId) -> Self {
        value.0
    }
}

impl AsRef<str> for ModelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_parses() {
        let id: ModelId = "  gpt-4 ".parse().expect("parse");
        assert_eq!(id.as_str(), "gpt-4");
        assert_eq!(id.to_string(), "gpt-4");
    }

    #[test]
    fn rejects_empty() {
        let err = ModelId::new("   ").expect_err("empty id");
        assert!(matches!(err, Error::InvalidModelId { .. }));
    }

    #[test]
    fn deserialization_validates() {
        let err = serde_json::from_str::<ModelId>("\"\"");
        assert!(err.is_err());
        let id: ModelId = serde_json::from_str("\"claude\"").unwrap();
        assert_eq!(id.as_str(), "claude");
    }
}
