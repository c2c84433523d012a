//! Values bound to template variables.

use std::fmt;

use serde_json::Value;
use sweep_primitives::Provenance;

use crate::{TemplateError, TemplateResult};

/// Correlation tag linking entries across list-valued variables.
///
/// Entries sharing an id are bound together in the same generated prompt
/// instead of being cross-producted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AssociateId(String);

impl AssociateId {
    /// Creates a correlation tag.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssociateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structured value carrying provenance and an optional correlation tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorrelatedValue {
    /// Text substituted for the placeholder.
    pub text: String,
    /// Substitutions to carry into the filled template's history.
    pub fill_history: Provenance,
    /// Side annotations to carry into the filled template.
    pub metavars: Provenance,
    /// Optional correlation tag.
    pub associate_id: Option<AssociateId>,
}

impl CorrelatedValue {
    /// Creates a value with the given text and no annotations.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Sets the correlation tag.
    #[must_use]
    pub fn associated(mut self, id: impl Into<String>) -> Self {
        self.associate_id = Some(AssociateId::new(id));
        self
    }

    /// Adds a metavar.
    #[must_use]
    pub fn with_metavar(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metavars.insert(key.into(), value.into());
        self
    }

    /// Adds a carried fill-history entry.
    #[must_use]
    pub fn with_history(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fill_history.insert(key.into(), value.into());
        self
    }
}

/// The value bound to one variable during generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    /// Plain text.
    Scalar(String),
    /// Text with carried provenance and an optional correlation tag.
    Correlated(CorrelatedValue),
}

impl ParamValue {
    /// Returns the text substituted for the placeholder.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Scalar(text) => text,
            Self::Correlated(value) => &value.text,
        }
    }

    /// Returns the correlation tag, if any.
    #[must_use]
    pub fn associate_id(&self) -> Option<&AssociateId> {
        match self {
            Self::Scalar(_) => None,
            Self::Correlated(value) => value.associate_id.as_ref(),
        }
    }

    fn from_json(name: &str, value: &Value) -> TemplateResult<Self> {
        match value {
            Value::String(text) => Ok(Self::Scalar(text.clone())),
            Value::Object(object) => {
                let text = object.get("text").and_then(Value::as_str).ok_or_else(|| {
                    TemplateError::invalid_parameter(name, "list entry object without a `text` string")
                })?;
                let associate_id = match object.get("associate_id") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(id)) => Some(AssociateId::new(id.clone())),
                    Some(Value::Number(id)) => Some(AssociateId::new(id.to_string())),
                    Some(other) => {
                        return Err(TemplateError::invalid_parameter(
                            name,
                            format!("associate_id of type {}", json_kind(other)),
                        ));
                    }
                };
                Ok(Self::Correlated(CorrelatedValue {
                    text: text.to_owned(),
                    fill_history: provenance_from_json(name, object.get("fill_history"))?,
                    metavars: provenance_from_json(name, object.get("metavars"))?,
                    associate_id,
                }))
            }
            other => Err(TemplateError::invalid_parameter(
                name,
                format!("list entry of type {}", json_kind(other)),
            )),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl From<CorrelatedValue> for ParamValue {
    fn from(value: CorrelatedValue) -> Self {
        Self::Correlated(value)
    }
}

/// What a variable is bound to: one string, or a list of alternatives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarValue {
    /// A single string, producing exactly one branch.
    Scalar(String),
    /// Alternatives, producing one branch per entry.
    List(Vec<ParamValue>),
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.to_owned())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        Self::Scalar(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for VarValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Insertion-ordered variable bindings.
///
/// The order matters: the generator processes variables in the order they were
/// inserted, restricted to those present in the template.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Variables {
    entries: Vec<(String, VarValue)>,
}

impl Variables {
    /// Creates an empty set of bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding, replacing an existing one of the same name in place.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds a binding, replacing an existing one of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<VarValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Returns the value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Iterates bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VarValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when there are no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry(&self, index: usize) -> (&str, &VarValue) {
        let (name, value) = &self.entries[index];
        (name, value)
    }

    /// Converts a JSON object into bindings, preserving key order.
    ///
    /// Strings become scalars. Arrays become lists whose entries are strings or
    /// objects with a `text` string and optional `fill_history`, `metavars`, and
    /// `associate_id` fields.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::InvalidParameterType`] for any other shape.
    pub fn from_json(value: &Value) -> TemplateResult<Self> {
        let Value::Object(object) = value else {
            return Err(TemplateError::invalid_parameter(
                "<root>",
                format!("expected an object of variables, got {}", json_kind(value)),
            ));
        };

        let mut variables = Self::new();
        for (name, value) in object {
            let bound = match value {
                Value::String(text) => VarValue::Scalar(text.clone()),
                Value::Array(items) => VarValue::List(
                    items
                        .iter()
                        .map(|item| ParamValue::from_json(name, item))
                        .collect::<TemplateResult<_>>()?,
                ),
                other => {
                    return Err(TemplateError::invalid_parameter(name.clone(), json_kind(other)));
                }
            };
            variables.insert(name.clone(), bound);
        }
        Ok(variables)
    }
}

fn provenance_from_json(name: &str, value: Option<&Value>) -> TemplateResult<Provenance> {
    let mut provenance = Provenance::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Object(object)) => {
            for (key, value) in object {
                let text = match value {
                    Value::String(text) => text.clone(),
                    Value::Number(_) | Value::Bool(_) => value.to_string(),
                    other => {
                        return Err(TemplateError::invalid_parameter(
                            name,
                            format!("annotation `{key}` of type {}", json_kind(other)),
                        ));
                    }
                };
                provenance.insert(key.clone(), text);
            }
        }
        Some(other) => {
            return Err(TemplateError::invalid_parameter(
                name,
                format!("annotations of type {}", json_kind(other)),
            ));
        }
    }
    Ok(provenance)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
