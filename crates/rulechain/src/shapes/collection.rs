//! Item-match rules over a collection value: `contains:field,value`.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::message::MessageRenderer;
use crate::params::{Equality, RuleParams, LIST_DELIMITER};
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use crate::value::values_equal;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const EXPECTED: &str = "field & value arguments";

/// Shape for rules testing whether any item of an array has a field equal to
/// a given value.
#[derive(Debug, Clone, Copy)]
pub struct ItemMatchRule {
    message: &'static str,
    fail_on_match: bool,
}

impl ItemMatchRule {
    pub fn new(message: &'static str, fail_on_match: bool) -> Self {
        Self {
            message,
            fail_on_match,
        }
    }
}

/// Parameter text is read as JSON when it parses (`3`, `"open"`, `true`) and
/// as a plain string otherwise.
fn literal(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn match_params(params: &RuleParams) -> Option<(String, Value, Option<Equality>)> {
    match params {
        RuleParams::Text(text) => {
            let (field, value) = text.split_once(LIST_DELIMITER)?;
            Some((field.trim().to_string(), literal(value), None))
        }
        RuleParams::Value(Value::Array(items)) => Some((
            items.first()?.as_str()?.to_string(),
            items.get(1).cloned().unwrap_or(Value::Null),
            None,
        )),
        RuleParams::Value(Value::Object(map)) => Some((
            map.get("field")?.as_str()?.to_string(),
            map.get("value").cloned().unwrap_or(Value::Null),
            None,
        )),
        RuleParams::Match {
            field,
            value,
            equality,
        } => Some((field.clone(), value.clone(), equality.clone())),
        _ => None,
    }
}

impl RuleFactory for ItemMatchRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        if ctx.params.is_none() {
            return Err(ConfigError::missing_params(ctx.rule, EXPECTED));
        }
        let (match_field, match_value, equality) =
            match_params(&ctx.params).ok_or_else(|| ConfigError::missing_params(ctx.rule, EXPECTED))?;
        ctx.require_field(&match_field)?;

        let extra = vec![
            ("$matchField", Value::String(match_field.clone())),
            (
                "$matchAlias",
                Value::String(ctx.aliases().get(&match_field).to_string()),
            ),
            ("$matchValue", match_value.clone()),
        ];

        Ok(Arc::new(ItemMatchValidator {
            rule: ctx.rule.to_string(),
            match_field,
            match_value,
            equality: equality.unwrap_or_else(|| Arc::new(values_equal) as Equality),
            fail_on_match: self.fail_on_match,
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
            extra,
        }))
    }
}

struct ItemMatchValidator {
    rule: String,
    match_field: String,
    match_value: Value,
    equality: Equality,
    fail_on_match: bool,
    template: String,
    renderer: MessageRenderer,
    extra: Vec<(&'static str, Value)>,
}

#[async_trait]
impl CompiledValidator for ItemMatchValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        let matched = value.as_array().is_some_and(|items| {
            items.iter().any(|item| {
                item.get(&self.match_field)
                    .is_some_and(|candidate| (self.equality)(&self.match_value, candidate))
            })
        });

        if matched == self.fail_on_match {
            chain.invalid(self.renderer.render(&self.template, &value, record, &self.extra));
        } else {
            chain.next();
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

pub(crate) fn register(registry: &mut RuleRegistry) {
    registry.insert(
        "contains",
        ItemMatchRule::new(
            "{$alias} does not contain an item whose {$matchAlias} equals {$matchValue}.",
            false,
        ),
    );
    registry.insert(
        "not_contains",
        ItemMatchRule::new(
            "{$alias} contains an item whose {$matchAlias} equals {$matchValue}.",
            true,
        ),
    );
}
