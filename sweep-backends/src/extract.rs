//! Pulling completion texts out of raw provider responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default extraction used by [`Backend::extract_responses`](crate::traits::Backend::extract_responses).
///
/// Accepts a bare string, an array of strings, or an object with a
/// `responses` array. Anything else yields no responses.
#[must_use]
pub fn default_responses(raw: &Value) -> Vec<String> {
    match raw {
        Value::String(text) => vec![text.clone()],
        Value::Array(items) => items.iter().filter_map(item_text).collect(),
        Value::Object(object) => object
            .get("responses")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(item_text).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Location of completion texts inside a JSON response, as JSON pointers.
///
/// `array` points at the list of choices; `item`, if set, is resolved
/// against each choice to reach its text.
///
/// ```
/// use serde_json::json;
/// use sweep_backends::extract::ResponsePath;
///
/// let path = ResponsePath::new("/choices").with_item("/message/content");
/// let raw = json!({ "choices": [ { "message": { "content": "4" } } ] });
/// assert_eq!(path.extract(&raw), vec!["4".to_owned()]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePath {
    array: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item: Option<String>,
}

impl ResponsePath {
    /// Creates a path pointing at an array of strings.
    #[must_use]
    pub fn new(array: impl Into<String>) -> Self {
        Self {
            array: array.into(),
            item: None,
        }
    }

    /// Resolves each array element through a further pointer.
    #[must_use]
    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }

    /// Extracts texts; missing pointers yield an empty list.
    #[must_use]
    pub fn extract(&self, raw: &Value) -> Vec<String> {
        let Some(items) = raw.pointer(&self.array).and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match &self.item {
                Some(pointer) => item.pointer(pointer),
                None => Some(item),
            })
            .filter_map(item_text)
            .collect()
    }
}

impl Default for ResponsePath {
    fn default() -> Self {
        Self::new("/responses")
    }
}

// Strings pass through, nulls are dropped, other values are rendered as JSON.
fn item_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
