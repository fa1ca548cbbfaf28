//! List membership rules: `in:a,b,c` and `not_in:a,b,c`.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::message::{join_friendly, MessageRenderer};
use crate::params::{split_list, RuleParams};
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use crate::value::{display_value, is_primitive, values_equal};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Shape for rules testing membership of the value in a fixed list.
#[derive(Debug, Clone, Copy)]
pub struct ListRule {
    message: &'static str,
    fail_when_listed: bool,
}

impl ListRule {
    pub fn new(message: &'static str, fail_when_listed: bool) -> Self {
        Self {
            message,
            fail_when_listed,
        }
    }
}

/// Membership test built once per compiled rule.
enum Lookup {
    /// Scalars keyed by their text form.
    Keys(HashSet<String>),
    /// Structural comparison against each item.
    Scan(Vec<Value>),
}

impl Lookup {
    fn new(values: Vec<Value>) -> Self {
        if values.iter().all(is_primitive) {
            Lookup::Keys(values.iter().map(display_value).collect())
        } else {
            Lookup::Scan(values)
        }
    }

    fn contains(&self, value: &Value) -> bool {
        match self {
            Lookup::Keys(keys) => is_primitive(value) && keys.contains(&display_value(value)),
            Lookup::Scan(items) => items.iter().any(|item| values_equal(item, value)),
        }
    }
}

impl RuleFactory for ListRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        if ctx.params.is_none() {
            return Err(ConfigError::missing_params(ctx.rule, "a list argument"));
        }
        let values: Vec<Value> = match &ctx.params {
            RuleParams::Text(text) => split_list(text, false)
                .into_iter()
                .map(Value::String)
                .collect(),
            RuleParams::Value(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        if values.is_empty() {
            return Err(ConfigError::invalid_params(ctx.rule, ctx.params.describe()));
        }

        let listed: Vec<String> = values.iter().map(display_value).collect();
        let extra = vec![
            ("$params", ctx.params.display()),
            ("$list", Value::String(join_friendly(&listed, "or", None))),
        ];

        Ok(Arc::new(ListValidator {
            rule: ctx.rule.to_string(),
            lookup: Lookup::new(values),
            fail_when_listed: self.fail_when_listed,
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
            extra,
        }))
    }
}

struct ListValidator {
    rule: String,
    lookup: Lookup,
    fail_when_listed: bool,
    template: String,
    renderer: MessageRenderer,
    extra: Vec<(&'static str, Value)>,
}

#[async_trait]
impl CompiledValidator for ListValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        if self.lookup.contains(&value) == self.fail_when_listed {
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
    registry.insert("in", ListRule::new("{$alias} must be one of {$list}.", false));
    registry.insert(
        "not_in",
        ListRule::new("{$alias} must not be one of {$list}.", true),
    );
}
