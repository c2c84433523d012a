//! Cached query/response records.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sweep_primitives::Provenance;

/// One prompt's query, its collected responses, and their provenance.
///
/// Serialized as a cache entry `{query, responses, raw_response, llm, info,
/// metavars}`; the prompt itself is the entry's key and is not repeated in the
/// value. Every field but the prompt defaults when absent, so older caches keep
/// loading. Non-string annotation values in `info` and `metavars` are read back
/// as their JSON text; `null` annotations are dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(skip)]
    prompt: String,
    #[serde(default)]
    query: Value,
    #[serde(default)]
    responses: Vec<String>,
    #[serde(default)]
    raw_response: Value,
    #[serde(default, rename = "llm")]
    backend_id: String,
    #[serde(default, rename = "info", deserialize_with = "lenient_provenance")]
    fill_history: Provenance,
    #[serde(default, deserialize_with = "lenient_provenance")]
    metavars: Provenance,
}

impl ResponseRecord {
    /// Creates a builder for a record of `prompt` answered by `backend_id`.
    #[must_use]
    pub fn builder(prompt: impl Into<String>, backend_id: impl Into<String>) -> ResponseRecordBuilder {
        ResponseRecordBuilder {
            record: Self {
                prompt: prompt.into(),
                query: Value::Null,
                responses: Vec::new(),
                raw_response: Value::Null,
                backend_id: backend_id.into(),
                fill_history: Provenance::new(),
                metavars: Provenance::new(),
            },
        }
    }

    /// Combines an older record with a newer one for the same prompt.
    ///
    /// Responses and raw responses are appended (older first, each raw side
    /// coerced to a list); every other field comes from `newer`.
    #[must_use]
    pub fn merge(older: Self, newer: Self) -> Self {
        let mut responses = older.responses;
        responses.extend(newer.responses);

        let mut raw = into_list(older.raw_response);
        raw.extend(into_list(newer.raw_response));

        Self {
            prompt: newer.prompt,
            query: newer.query,
            responses,
            raw_response: Value::Array(raw),
            backend_id: newer.backend_id,
            fill_history: newer.fill_history,
            metavars: newer.metavars,
        }
    }

    /// Returns a copy holding at most `n` responses.
    #[must_use]
    pub fn limited_to(&self, n: usize) -> Self {
        let mut record = self.clone();
        record.responses.truncate(n);
        record
    }

    /// Replaces the provenance with that of the template currently being run.
    #[must_use]
    pub fn with_provenance(mut self, fill_history: Provenance, metavars: Provenance) -> Self {
        self.fill_history = fill_history;
        self.metavars = metavars;
        self
    }

    /// Returns the fully substituted prompt (the cache key).
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Returns the request payload that produced the responses.
    #[must_use]
    pub fn query(&self) -> &Value {
        &self.query
    }

    /// Returns the extracted completions.
    #[must_use]
    pub fn responses(&self) -> &[String] {
        &self.responses
    }

    /// Returns the provider payload(s).
    #[must_use]
    pub fn raw_response(&self) -> &Value {
        &self.raw_response
    }

    /// Returns the identifier of the model that answered.
    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Returns the substitutions that produced the prompt.
    #[must_use]
    pub fn fill_history(&self) -> &Provenance {
        &self.fill_history
    }

    /// Returns the side annotations carried with the prompt.
    #[must_use]
    pub fn metavars(&self) -> &Provenance {
        &self.metavars
    }

    pub(crate) fn set_prompt(&mut self, prompt: &str) {
        prompt.clone_into(&mut self.prompt);
    }
}

/// Builder type used to assemble [`ResponseRecord`] instances.
#[derive(Debug)]
pub struct ResponseRecordBuilder {
    record: ResponseRecord,
}

impl ResponseRecordBuilder {
    /// Sets the request payload.
    #[must_use]
    pub fn query(mut self, query: Value) -> Self {
        self.record.query = query;
        self
    }

    /// Sets the extracted completions.
    #[must_use]
    pub fn responses(mut self, responses: Vec<String>) -> Self {
        self.record.responses = responses;
        self
    }

    /// Sets the raw provider payload.
    #[must_use]
    pub fn raw_response(mut self, raw: Value) -> Self {
        self.record.raw_response = raw;
        self
    }

    /// Sets the fill history.
    #[must_use]
    pub fn fill_history(mut self, fill_history: Provenance) -> Self {
        self.record.fill_history = fill_history;
        self
    }

    /// Sets the metavars.
    #[must_use]
    pub fn metavars(mut self, metavars: Provenance) -> Self {
        self.record.metavars = metavars;
        self
    }

    /// Finalises the record.
    #[must_use]
    pub fn build(self) -> ResponseRecord {
        self.record
    }
}

fn lenient_provenance<'de, D>(deserializer: D) -> Result<Provenance, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(text) => Some((key, text)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    }
}
