//! Cross-field rules and field-list rules.
//!
//! Both read sibling fields off the record when the rule runs, never when it
//! is compiled. Referenced fields must be declared by the schema.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::message::{join_friendly, MessageRenderer};
use crate::params::{split_list, RuleParams};
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use crate::value::{display_value, is_empty, values_equal};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// How a cross-field rule combines the sibling values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldsCheck {
    /// Every sibling equals the value.
    Confirmed,
    /// At least one sibling differs from the value.
    Different,
    /// Skip the remaining rules when a sibling already failed this run.
    IfValid,
    /// Required when any sibling is present.
    RequiredWith,
    /// Required when every sibling is present.
    RequiredWithAll,
    /// Required when any sibling is missing.
    RequiredWithout,
    /// Required when every sibling is missing.
    RequiredWithoutAll,
}

enum Decision {
    Next,
    Stop,
    Invalid,
}

impl FieldsCheck {
    fn decide(&self, value: &Value, fields: &[String], record: &dyn Record, chain: &ChainControl) -> Decision {
        let mut siblings = fields.iter().map(|field| record.get(field));
        let required = match self {
            FieldsCheck::Confirmed => {
                return decision(siblings.all(|other| values_equal(value, &other)));
            }
            FieldsCheck::Different => {
                return decision(siblings.any(|other| !values_equal(value, &other)));
            }
            FieldsCheck::IfValid => {
                return if fields.iter().any(|field| chain.run().has_failed(field)) {
                    Decision::Stop
                } else {
                    Decision::Next
                };
            }
            FieldsCheck::RequiredWith => siblings.any(|other| !is_empty(&other)),
            FieldsCheck::RequiredWithAll => siblings.all(|other| !is_empty(&other)),
            FieldsCheck::RequiredWithout => siblings.any(|other| is_empty(&other)),
            FieldsCheck::RequiredWithoutAll => siblings.all(|other| is_empty(&other)),
        };
        decision(!(required && is_empty(value)))
    }
}

fn decision(valid: bool) -> Decision {
    if valid {
        Decision::Next
    } else {
        Decision::Invalid
    }
}

/// Shape for rules comparing against a list of sibling fields: `confirmed:password`.
#[derive(Debug, Clone, Copy)]
pub struct FieldsRule {
    message: &'static str,
    check: FieldsCheck,
}

impl FieldsRule {
    pub fn new(message: &'static str, check: FieldsCheck) -> Self {
        Self { message, check }
    }
}

impl RuleFactory for FieldsRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        if ctx.params.is_none() {
            return Err(ConfigError::missing_params(ctx.rule, "an array of fields argument"));
        }
        let fields = ctx
            .params
            .field_list()
            .ok_or_else(|| ConfigError::invalid_params(ctx.rule, ctx.params.describe()))?;
        for field in &fields {
            ctx.require_field(field)?;
        }

        let extra = vec![
            ("$fields", Value::String(join_friendly(&fields, "and", None))),
            (
                "$fieldAliases",
                Value::String(join_friendly(&fields, "and", Some(ctx.aliases()))),
            ),
        ];

        Ok(Arc::new(FieldsValidator {
            rule: ctx.rule.to_string(),
            check: self.check,
            fields,
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
            extra,
        }))
    }
}

struct FieldsValidator {
    rule: String,
    check: FieldsCheck,
    fields: Vec<String>,
    template: String,
    renderer: MessageRenderer,
    extra: Vec<(&'static str, Value)>,
}

#[async_trait]
impl CompiledValidator for FieldsValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        match self.check.decide(&value, &self.fields, record, chain) {
            Decision::Next => chain.next(),
            Decision::Stop => chain.stop(),
            Decision::Invalid => {
                chain.invalid(self.renderer.render(&self.template, &value, record, &self.extra))
            }
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

/// Shape for conditional requiredness keyed by another field's value:
/// `required_if:status,open,pending`.
#[derive(Debug, Clone, Copy)]
pub struct FieldListRule {
    message: &'static str,
    /// Whether a trigger value in the list makes the field required (`true`)
    /// or exempts it (`false`).
    required_when_listed: bool,
}

impl FieldListRule {
    pub fn new(message: &'static str, required_when_listed: bool) -> Self {
        Self {
            message,
            required_when_listed,
        }
    }
}

fn field_and_values(params: &RuleParams) -> Option<(String, Vec<Value>)> {
    match params {
        RuleParams::Text(text) => {
            let mut parts = split_list(text, false).into_iter();
            let field = parts.next()?;
            Some((field, parts.map(Value::String).collect()))
        }
        RuleParams::Value(Value::Array(items)) => {
            let (field, values) = items.split_first()?;
            Some((field.as_str()?.to_string(), values.to_vec()))
        }
        RuleParams::Value(Value::Object(map)) => {
            let field = map.get("field")?.as_str()?.to_string();
            let values = match map.get("values") {
                Some(Value::Array(values)) => values.clone(),
                Some(single) => vec![single.clone()],
                None => Vec::new(),
            };
            Some((field, values))
        }
        _ => None,
    }
}

impl RuleFactory for FieldListRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        if ctx.params.is_none() {
            return Err(ConfigError::missing_params(ctx.rule, "a field and list arguments"));
        }
        let (match_field, values) = field_and_values(&ctx.params)
            .ok_or_else(|| ConfigError::invalid_params(ctx.rule, ctx.params.describe()))?;
        ctx.require_field(&match_field)?;

        let listed: Vec<String> = values.iter().map(display_value).collect();
        let extra = vec![
            ("$params", ctx.params.display()),
            ("$matchField", Value::String(match_field.clone())),
            (
                "$matchAlias",
                Value::String(ctx.aliases().get(&match_field).to_string()),
            ),
            ("$list", Value::String(join_friendly(&listed, "and", None))),
        ];

        Ok(Arc::new(FieldListValidator {
            rule: ctx.rule.to_string(),
            match_field,
            triggers: listed.into_iter().collect(),
            required_when_listed: self.required_when_listed,
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
            extra,
        }))
    }
}

struct FieldListValidator {
    rule: String,
    match_field: String,
    triggers: HashSet<String>,
    required_when_listed: bool,
    template: String,
    renderer: MessageRenderer,
    extra: Vec<(&'static str, Value)>,
}

#[async_trait]
impl CompiledValidator for FieldListValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        let trigger = display_value(&record.get(&self.match_field));
        let required = self.triggers.contains(&trigger) == self.required_when_listed;

        if required && is_empty(&value) {
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
        "confirmed",
        FieldsRule::new("{$alias} must match {$fieldAliases}.", FieldsCheck::Confirmed),
    );
    registry.insert(
        "different",
        FieldsRule::new("{$alias} must not match {$fieldAliases}.", FieldsCheck::Different),
    );
    registry.insert("if_valid", FieldsRule::new("", FieldsCheck::IfValid));
    registry.insert(
        "required_with",
        FieldsRule::new("{$alias} is required.", FieldsCheck::RequiredWith),
    );
    registry.insert(
        "required_with_all",
        FieldsRule::new("{$alias} is required.", FieldsCheck::RequiredWithAll),
    );
    registry.insert(
        "required_without",
        FieldsRule::new("{$alias} is required.", FieldsCheck::RequiredWithout),
    );
    registry.insert(
        "required_without_all",
        FieldsRule::new("{$alias} is required.", FieldsCheck::RequiredWithoutAll),
    );

    registry.insert("required_if", FieldListRule::new("{$alias} is required.", true));
    registry.insert("required_unless", FieldListRule::new("{$alias} is required.", false));
}
