//! Built-in rule shapes.
//!
//! Each shape is a [`RuleFactory`](crate::RuleFactory) parameterised by its
//! default message and the predicate that tells a passing value from a
//! failing one. The standard registry binds every built-in rule name to one
//! of these.

mod basic;
mod branch;
mod collection;
mod date;
mod fields;
mod foreign;
mod list;
mod size;
mod transform;

pub use basic::{PatternRule, PredicateRule, RegexRule, Verdict};
pub use branch::{Branch, BranchRule};
pub use collection::ItemMatchRule;
pub use date::DateRule;
pub use fields::{FieldListRule, FieldsCheck, FieldsRule};
pub use foreign::ForeignRule;
pub use list::ListRule;
pub use size::{RangeRule, SizeRule, TypedMessages};
pub use transform::{Transform, TransformRule};

use crate::registry::RuleRegistry;

pub(crate) fn register_standard(registry: &mut RuleRegistry) {
    basic::register(registry);
    size::register(registry);
    transform::register(registry);
    fields::register(registry);
    foreign::register(registry);
    collection::register(registry);
    list::register(registry);
    date::register(registry);
    branch::register(registry);
    tracing::debug!(rules = registry.len(), "standard rules registered");
}
