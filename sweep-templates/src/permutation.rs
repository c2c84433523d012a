//! Recursive expansion of a template over variable bindings.

use tracing::trace;

use crate::param::{ParamValue, VarValue, Variables};
use crate::template::Template;
use crate::TemplateResult;

/// Expands a [`Template`] into every prompt variant described by [`Variables`].
///
/// Variables are consumed in insertion order, one at a time, choosing the first
/// one that still occurs in the current template. Scalars fill in place; lists
/// branch once per entry. When a list entry carries an associate id, the entries
/// sharing that id in the other list variables present in the template are
/// bound in the same step, so correlated rows stay together rather than being
/// cross-producted. If several entries of one variable share an id, the first
/// in list order is used. Variables that never occur are ignored.
///
/// # Examples
///
/// ```
/// use sweep_templates::{PermutationGenerator, Variables};
///
/// let generator = PermutationGenerator::new("${greeting}, ${name}!").unwrap();
/// let vars = Variables::new()
///     .with("greeting", vec!["Hi", "Hello", "Hey"])
///     .with("name", vec!["Ada", "Alan", "Grace"]);
///
/// assert_eq!(generator.generate(&vars).len(), 9);
/// ```
#[derive(Clone, Debug)]
pub struct PermutationGenerator {
    template: Template,
}

impl PermutationGenerator {
    /// Creates a generator for the supplied template text.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`](crate::TemplateError::Syntax) if the
    /// text is not a valid template.
    pub fn new(template: &str) -> TemplateResult<Self> {
        Ok(Self::from_template(Template::parse(template)?))
    }

    /// Creates a generator for an already parsed template.
    #[must_use]
    pub const fn from_template(template: Template) -> Self {
        Self { template }
    }

    /// Returns the root template.
    #[must_use]
    pub const fn template(&self) -> &Template {
        &self.template
    }

    /// Produces every filled template, depth-first in variable order.
    #[must_use]
    pub fn generate(&self, vars: &Variables) -> Vec<Template> {
        let remaining: Vec<usize> = (0..vars.len()).collect();
        let mut out = Vec::new();
        expand(self.template.clone(), vars, &remaining, &mut out);
        trace!(count = out.len(), "generated prompt permutations");
        out
    }

    /// Returns how many templates [`generate`](Self::generate) would produce.
    #[must_use]
    pub fn count(&self, vars: &Variables) -> usize {
        self.generate(vars).len()
    }
}

fn expand(
    template: Template,
    vars: &Variables,
    remaining: &[usize],
    out: &mut Vec<Template>,
) {
    let Some(&selected) = remaining
        .iter()
        .find(|&&index| template.has_var(vars.entry(index).0))
    else {
        out.push(template);
        return;
    };

    let (name, value) = vars.entry(selected);
    match value {
        VarValue::Scalar(text) => {
            let bound = ParamValue::Scalar(text.clone());
            let filled = template.fill([(name, &bound)]);
            let rest = without(remaining, &[selected]);
            expand(filled, vars, &rest, out);
        }
        VarValue::List(entries) => {
            for entry in entries {
                let mut bindings: Vec<(&str, &ParamValue)> = vec![(name, entry)];
                let mut consumed = vec![selected];

                if let Some(id) = entry.associate_id() {
                    for &other in remaining.iter().filter(|&&index| index != selected) {
                        let (other_name, other_value) = vars.entry(other);
                        let VarValue::List(other_entries) = other_value else {
                            continue;
                        };
                        if !template.has_var(other_name) {
                            continue;
                        }
                        // First match wins when several entries share the id.
                        if let Some(partner) = other_entries
                            .iter()
                            .find(|candidate| candidate.associate_id() == Some(id))
                        {
                            bindings.push((other_name, partner));
                            consumed.push(other);
                        }
                    }
                }

                let filled = template.fill(bindings);
                let rest = without(remaining, &consumed);
                expand(filled, vars, &rest, out);
            }
        }
    }
}

fn without(remaining: &[usize], consumed: &[usize]) -> Vec<usize> {
    remaining
        .iter()
        .copied()
        .filter(|index| !consumed.contains(index))
        .collect()
}
