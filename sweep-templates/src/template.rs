//! Prompt templates with `${name}` placeholders and substitution provenance.

use std::fmt;

use sweep_primitives::Provenance;
use tracing::warn;

use crate::param::ParamValue;
use crate::{TemplateError, TemplateResult};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A prompt with named `${identifier}` placeholders.
///
/// A `$` that does not open a placeholder is literal text, so prompts such as
/// `"What is $2 + $2?"` pass through substitution unchanged. Templates are never
/// mutated: [`fill`](Self::fill) returns a new template carrying the previous
/// fill history and metavars forward.
///
/// # Examples
///
/// ```
/// use sweep_templates::{ParamValue, Template};
///
/// let template = Template::parse("Who invented ${tool}? It cost $5.").unwrap();
/// let filled = template.fill([("tool", &ParamValue::from("the lightbulb"))]);
///
/// assert!(filled.is_concrete());
/// assert_eq!(filled.body(), "Who invented the lightbulb? It cost $5.");
/// assert_eq!(filled.fill_history()["tool"], "the lightbulb");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
    fill_history: Provenance,
    metavars: Provenance,
}

impl Template {
    /// Parses a template body.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] when a `${` is not followed by an
    /// identifier and a closing `}`.
    pub fn parse(body: &str) -> TemplateResult<Self> {
        Ok(Self {
            segments: parse_segments(body)?,
            fill_history: Provenance::new(),
            metavars: Provenance::new(),
        })
    }

    /// Attaches initial metavars to the template.
    #[must_use]
    pub fn with_metavars(mut self, metavars: Provenance) -> Self {
        self.metavars = metavars;
        self
    }

    /// Substitutes the supplied bindings, returning a new template.
    ///
    /// Placeholders without a binding remain in the output. For correlated
    /// values, their carried fill history and metavars are merged first and the
    /// direct bindings are recorded afterwards, so a carried entry never shadows
    /// a direct substitution. Key collisions are logged and the later write wins.
    ///
    /// A bound value may itself contain placeholders, which become fillable in
    /// the returned template. A value that is not a valid template is inserted
    /// as literal text.
    #[must_use]
    pub fn fill<'a, I>(&self, bindings: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a ParamValue)>,
    {
        let bindings: Vec<(&str, &ParamValue)> = bindings.into_iter().collect();

        let mut fill_history = self.fill_history.clone();
        let mut metavars = self.metavars.clone();
        for (_, value) in &bindings {
            if let ParamValue::Correlated(correlated) = value {
                merge_provenance(&mut fill_history, &correlated.fill_history, "fill history");
                merge_provenance(&mut metavars, &correlated.metavars, "metavars");
            }
        }
        for (name, value) in &bindings {
            record(&mut fill_history, name, value.text(), "fill history");
        }

        let mut segments = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Var(name) => {
                    match bindings.iter().find(|(bound, _)| *bound == name.as_str()) {
                        Some((_, value)) => {
                            let text = value.text();
                            match parse_segments(text) {
                                Ok(parsed) => parsed
                                    .into_iter()
                                    .for_each(|seg| push_segment(&mut segments, seg)),
                                Err(_) => {
                                    push_segment(&mut segments, Segment::Text(text.to_owned()));
                                }
                            }
                        }
                        None => push_segment(&mut segments, segment.clone()),
                    }
                }
                Segment::Text(_) => push_segment(&mut segments, segment.clone()),
            }
        }

        Self {
            segments,
            fill_history,
            metavars,
        }
    }

    /// Returns `true` if the placeholder `name` occurs in the current body.
    #[must_use]
    pub fn has_var(&self, name: &str) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Var(var) if var == name))
    }

    /// Returns `true` when no placeholders remain unresolved.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        !self
            .segments
            .iter()
            .any(|segment| matches!(segment, Segment::Var(_)))
    }

    /// Returns the unresolved placeholder names in body order, without duplicates.
    #[must_use]
    pub fn vars(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Var(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Renders the current body; unresolved placeholders appear as `${name}`.
    #[must_use]
    pub fn body(&self) -> String {
        self.to_string()
    }

    /// Returns the substitutions applied so far (variable name → substituted text).
    #[must_use]
    pub fn fill_history(&self) -> &Provenance {
        &self.fill_history
    }

    /// Returns the side-channel annotations carried with this template.
    #[must_use]
    pub fn metavars(&self) -> &Provenance {
        &self.metavars
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => f.write_str(text)?,
                Segment::Var(name) => write!(f, "${{{name}}}")?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_segments(body: &str) -> TemplateResult<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find("${") {
        let position = body.len() - rest.len() + start;
        if start > 0 {
            push_segment(&mut segments, Segment::Text(rest[..start].to_owned()));
        }

        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(TemplateError::Syntax {
                position,
                reason: "unterminated placeholder".to_owned(),
            });
        };

        let name = &after[..end];
        if !is_identifier(name) {
            return Err(TemplateError::Syntax {
                position,
                reason: format!("`{name}` is not a valid placeholder name"),
            });
        }

        segments.push(Segment::Var(name.to_owned()));
        rest = &after[end + 1..];
    }

    if !rest.is_empty() {
        push_segment(&mut segments, Segment::Text(rest.to_owned()));
    }

    Ok(segments)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

// Adjacent text segments are coalesced.
fn push_segment(segments: &mut Vec<Segment>, segment: Segment) {
    if let (Some(Segment::Text(last)), Segment::Text(text)) = (segments.last_mut(), &segment) {
        last.push_str(text);
        return;
    }
    segments.push(segment);
}

fn merge_provenance(target: &mut Provenance, incoming: &Provenance, kind: &str) {
    for (key, value) in incoming {
        record(target, key, value, kind);
    }
}

fn record(target: &mut Provenance, key: &str, value: &str, kind: &str) {
    if let Some(previous) = target.insert(key.to_owned(), value.to_owned()) {
        if previous != value {
            warn!(
                key,
                previous = %previous,
                value,
                kind,
                "template provenance key overwritten"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::CorrelatedValue;

    #[test]
    fn literal_dollars_round_trip() {
        let template = Template::parse("What is $2 + $2?").unwrap();
        let none: [(&str, &ParamValue); 0] = [];
        let filled = template.fill(none);
        assert_eq!(filled.body(), "What is $2 + $2?");
        assert!(filled.is_concrete());
    }

    #[test]
    fn partial_fill_keeps_unbound_placeholders() {
        let template = Template::parse("${greeting}, ${name}! That is $${price}.").unwrap();
        let filled = template.fill([("greeting", &ParamValue::from("Hello"))]);

        assert_eq!(filled.body(), "Hello, ${name}! That is $${price}.");
        assert!(!filled.is_concrete());
        assert!(filled.has_var("name"));
        assert!(!filled.has_var("greeting"));
        assert_eq!(filled.vars(), vec!["name", "price"]);
        // The original is untouched.
        assert!(template.has_var("greeting"));
    }

    #[test]
    fn rejects_malformed_placeholders() {
        let err = Template::parse("Hello ${name").unwrap_err();
        assert_eq!(
            err,
            TemplateError::Syntax {
                position: 6,
                reason: "unterminated placeholder".to_owned()
            }
        );
        assert!(Template::parse("${}").is_err());
        assert!(Template::parse("${1st}").is_err());
        assert!(Template::parse("${a b}").is_err());
    }

    #[test]
    fn nested_values_become_fillable() {
        let template = Template::parse("Q: ${prefix}").unwrap();
        let filled = template.fill([("prefix", &ParamValue::from("Who invented ${tool}?"))]);
        assert!(filled.has_var("tool"));

        let done = filled.fill([("tool", &ParamValue::from("CRISPR"))]);
        assert_eq!(done.body(), "Q: Who invented CRISPR?");
        assert_eq!(done.fill_history().len(), 2);
    }

    #[test]
    fn malformed_values_are_inserted_literally() {
        let template = Template::parse("Say ${x}").unwrap();
        let filled = template.fill([("x", &ParamValue::from("${oops"))]);
        assert!(filled.is_concrete());
        assert_eq!(filled.body(), "Say ${oops");
    }

    #[test]
    fn direct_binding_wins_over_carried_history() {
        let mut carried = Provenance::new();
        carried.insert("lang".to_owned(), "carried".to_owned());
        carried.insert("origin".to_owned(), "table".to_owned());
        let mut metavars = Provenance::new();
        metavars.insert("row".to_owned(), "3".to_owned());

        let value = ParamValue::Correlated(CorrelatedValue {
            text: "French".to_owned(),
            fill_history: carried,
            metavars,
            associate_id: None,
        });

        let template = Template::parse("Translate to ${lang}").unwrap();
        let filled = template.fill([("lang", &value)]);

        assert_eq!(filled.fill_history()["lang"], "French");
        assert_eq!(filled.fill_history()["origin"], "table");
        assert_eq!(filled.metavars()["row"], "3");
    }

    #[test]
    fn repeated_placeholders_are_all_filled() {
        let template = Template::parse("${x} and ${x}").unwrap();
        let filled = template.fill([("x", &ParamValue::from("y"))]);
        assert_eq!(filled.body(), "y and y");
    }
}
