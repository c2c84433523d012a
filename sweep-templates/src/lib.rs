//! Prompt templates and permutation generation.
//!
//! A [`Template`] holds a prompt with `${name}` placeholders. The
//! [`PermutationGenerator`] expands one template against a set of
//! [`Variables`] into every concrete (or partially filled) prompt variant.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod param;
mod permutation;
mod template;

pub use error::{TemplateError, TemplateResult};
pub use param::{AssociateId, CorrelatedValue, ParamValue, VarValue, Variables};
pub use permutation::PermutationGenerator;
pub use template::Template;
