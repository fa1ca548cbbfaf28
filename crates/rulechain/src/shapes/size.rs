//! Sized and ranged rules.
//!
//! The size of a value is its character count, numeric value, or item count.
//! Messages are picked by the value's [`TypeTag`]; a value whose type has no
//! message (null, booleans) is never checked.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::message::{Message, MessageRenderer};
use crate::params::{parse_float_str, split_list, RuleParams};
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use crate::value::{number, size_of, TypeTag};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Default messages for the string, number, and object forms of a rule.
#[derive(Debug, Clone, Copy)]
pub struct TypedMessages {
    pub string: &'static str,
    pub number: &'static str,
    pub object: &'static str,
}

impl TypedMessages {
    fn resolve(&self, explicit: Option<&Message>) -> HashMap<TypeTag, String> {
        match explicit {
            Some(message) => message.by_type(),
            None => HashMap::from([
                (TypeTag::String, self.string.to_string()),
                (TypeTag::Number, self.number.to_string()),
                (TypeTag::Object, self.object.to_string()),
            ]),
        }
    }
}

/// Shape comparing the size against one bound: `min:3`.
#[derive(Debug, Clone, Copy)]
pub struct SizeRule {
    messages: TypedMessages,
    is_invalid: fn(f64, f64) -> bool,
}

impl SizeRule {
    pub fn new(messages: TypedMessages, is_invalid: fn(f64, f64) -> bool) -> Self {
        Self {
            messages,
            is_invalid,
        }
    }
}

impl RuleFactory for SizeRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        let bound = match &ctx.params {
            RuleParams::Text(text) => parse_float_str(text),
            RuleParams::Value(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
        .ok_or_else(|| ConfigError::InvalidNumber {
            rule: ctx.rule.to_string(),
            params: ctx.params.describe(),
        })?;

        let is_invalid = self.is_invalid;
        Ok(Arc::new(SizedValidator {
            rule: ctx.rule.to_string(),
            templates: self.messages.resolve(ctx.message.as_ref()),
            renderer: ctx.renderer(),
            extra: vec![("$number", ctx.params.display())],
            is_invalid: Box::new(move |size| is_invalid(size, bound)),
        }))
    }
}

/// Shape comparing the size against an inclusive range: `between:3,10`.
#[derive(Debug, Clone, Copy)]
pub struct RangeRule {
    messages: TypedMessages,
    is_invalid: fn(f64, f64, f64) -> bool,
}

impl RangeRule {
    pub fn new(messages: TypedMessages, is_invalid: fn(f64, f64, f64) -> bool) -> Self {
        Self {
            messages,
            is_invalid,
        }
    }
}

fn range_bounds(params: &RuleParams) -> Option<(f64, f64)> {
    match params {
        RuleParams::Text(text) => {
            let parts = split_list(text, true);
            Some((
                parse_float_str(parts.first()?)?,
                parse_float_str(parts.get(1)?)?,
            ))
        }
        RuleParams::Value(Value::Array(items)) => {
            Some((items.first()?.as_f64()?, items.get(1)?.as_f64()?))
        }
        RuleParams::Value(Value::Object(map)) => {
            Some((map.get("start")?.as_f64()?, map.get("end")?.as_f64()?))
        }
        _ => None,
    }
}

impl RuleFactory for RangeRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        let (start, end) = range_bounds(&ctx.params).ok_or_else(|| ConfigError::InvalidRange {
            rule: ctx.rule.to_string(),
            params: ctx.params.describe(),
        })?;

        let is_invalid = self.is_invalid;
        Ok(Arc::new(SizedValidator {
            rule: ctx.rule.to_string(),
            templates: self.messages.resolve(ctx.message.as_ref()),
            renderer: ctx.renderer(),
            extra: vec![("$start", number(start)), ("$end", number(end))],
            is_invalid: Box::new(move |size| is_invalid(size, start, end)),
        }))
    }
}

struct SizedValidator {
    rule: String,
    templates: HashMap<TypeTag, String>,
    renderer: MessageRenderer,
    extra: Vec<(&'static str, Value)>,
    is_invalid: Box<dyn Fn(f64) -> bool + Send + Sync>,
}

#[async_trait]
impl CompiledValidator for SizedValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        let template = TypeTag::of(&value).and_then(|tag| self.templates.get(&tag));
        let size = size_of(&value);

        match (template, size) {
            (Some(template), Some(size)) if (self.is_invalid)(size) => {
                let mut extra = self.extra.clone();
                extra.push(("$size", number(size)));
                chain.invalid(self.renderer.render(template, &value, record, &extra));
            }
            _ => chain.next(),
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

pub(crate) fn register(registry: &mut RuleRegistry) {
    registry.insert(
        "min",
        SizeRule::new(
            TypedMessages {
                string: "{$alias} must have a minimum of {$number} characters.",
                number: "{$alias} must be at least {$number}.",
                object: "{$alias} must have at least {$number} items.",
            },
            |size, bound| size < bound,
        ),
    );
    registry.insert(
        "greater_than",
        SizeRule::new(
            TypedMessages {
                string: "{$alias} must have more than {$number} characters.",
                number: "{$alias} must be greater than {$number}.",
                object: "{$alias} must have more than {$number} items.",
            },
            |size, bound| size <= bound,
        ),
    );
    registry.insert(
        "max",
        SizeRule::new(
            TypedMessages {
                string: "{$alias} must have no more than {$number} characters.",
                number: "{$alias} must be no more than {$number}.",
                object: "{$alias} must have no more than {$number} items.",
            },
            |size, bound| size > bound,
        ),
    );
    registry.insert(
        "less_than",
        SizeRule::new(
            TypedMessages {
                string: "{$alias} must have less than {$number} characters.",
                number: "{$alias} must be less than {$number}.",
                object: "{$alias} must have less than {$number} items.",
            },
            |size, bound| size >= bound,
        ),
    );
    registry.insert(
        "equal",
        SizeRule::new(
            TypedMessages {
                string: "{$alias} must have {$number} characters.",
                number: "{$alias} must equal {$number}.",
                object: "{$alias} must have {$number} items.",
            },
            |size, bound| size != bound,
        ),
    );
    registry.insert(
        "not_equal",
        SizeRule::new(
            TypedMessages {
                string: "{$alias} must not have {$number} characters.",
                number: "{$alias} must not equal {$number}.",
                object: "{$alias} must not have {$number} items.",
            },
            |size, bound| size == bound,
        ),
    );

    registry.insert(
        "between",
        RangeRule::new(
            TypedMessages {
                string: "{$alias} must have between {$start} to {$end} characters.",
                number: "{$alias} must be between {$start} and {$end}.",
                object: "{$alias} must have between {$start} to {$end} items.",
            },
            |size, start, end| size < start || size > end,
        ),
    );
    registry.insert(
        "not_between",
        RangeRule::new(
            TypedMessages {
                string: "{$alias} must not have between {$start} to {$end} characters.",
                number: "{$alias} must not be between {$start} and {$end}.",
                object: "{$alias} must not have between {$start} to {$end} items.",
            },
            |size, start, end| size >= start && size <= end,
        ),
    );
}
