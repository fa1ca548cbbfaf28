//! Branching sub-rules: `if`, `if_any`, `if_not`.
//!
//! `if:status:in:open|required` compiles `in:open` for `status`. When the
//! outer chain reaches it, every nested rule runs as its own single-link chain
//! against `status` (read once, before any of them start). The nested chains
//! run concurrently and the outer chain resumes only after all of them end;
//! the invalid count then decides whether it continues or stops.

use crate::chain::{ChainControl, CompiledValidator, ValidationChain};
use crate::error::{ConfigError, Result};
use crate::params::{RuleParams, RULE_SEPARATOR};
use crate::parser::RuleSpec;
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;

/// When a branch lets the outer chain continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Every nested rule passed.
    All,
    /// At least one nested rule passed.
    Any,
    /// Not every nested rule passed.
    NotAll,
}

impl Branch {
    /// Whether the outer chain should stop.
    pub fn stops(&self, invalid: usize, total: usize) -> bool {
        match self {
            Branch::All => invalid > 0,
            Branch::Any => invalid >= total,
            Branch::NotAll => invalid < total,
        }
    }
}

/// Shape compiling a nested rule set that gates the rest of the chain.
#[derive(Debug, Clone, Copy)]
pub struct BranchRule(pub Branch);

fn nested_spec(params: &RuleParams, own_field: &str, rule: &str) -> Result<(String, Option<RuleSpec>)> {
    let or_own = |field: &str| {
        if field.is_empty() {
            own_field.to_string()
        } else {
            field.to_string()
        }
    };

    match params {
        RuleParams::Text(text) => {
            let (field, rules) = text
                .split_once(RULE_SEPARATOR)
                .ok_or_else(|| ConfigError::invalid_params(rule, text))?;
            let spec = (!rules.is_empty()).then(|| RuleSpec::Text(rules.to_string()));
            Ok((or_own(field), spec))
        }
        RuleParams::Value(Value::Array(items)) => {
            let (field, rules) = items
                .split_first()
                .ok_or_else(|| ConfigError::missing_params(rule, "a validation rule argument"))?;
            let field = or_own(field.as_str().unwrap_or_default());
            let spec = RuleSpec::try_from(Value::Array(rules.to_vec()))?;
            let spec = match &spec {
                RuleSpec::List(tokens) if tokens.is_empty() => None,
                _ => Some(spec),
            };
            Ok((field, spec))
        }
        RuleParams::Value(Value::Object(map)) => {
            let field = or_own(map.get("field").and_then(Value::as_str).unwrap_or_default());
            let spec = match map.get("rules") {
                None | Some(Value::Null) => None,
                Some(rules) => Some(RuleSpec::try_from(rules.clone())?),
            };
            Ok((field, spec))
        }
        other => Err(ConfigError::invalid_params(rule, other.describe())),
    }
}

impl RuleFactory for BranchRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        if ctx.params.is_none() {
            return Err(ConfigError::missing_params(ctx.rule, "a validation rule argument"));
        }
        let (other_field, spec) = nested_spec(&ctx.params, ctx.field, ctx.rule)?;
        ctx.require_field(&other_field)?;
        let spec = spec.ok_or_else(|| ConfigError::MissingRules(ctx.rule.to_string()))?;

        let validators = ctx.compiler().parse_rules(&spec, &other_field, None)?;
        if validators.is_empty() {
            return Err(ConfigError::MissingRules(ctx.rule.to_string()));
        }

        Ok(Arc::new(BranchValidator {
            rule: ctx.rule.to_string(),
            field: ctx.field.to_string(),
            other_field,
            validators,
            branch: self.0,
        }))
    }
}

struct BranchValidator {
    rule: String,
    field: String,
    other_field: String,
    validators: Vec<Arc<dyn CompiledValidator>>,
    branch: Branch,
}

#[async_trait]
impl CompiledValidator for BranchValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        let test_value = if self.other_field == self.field {
            value
        } else {
            record.get(&self.other_field)
        };

        let nested = self.validators.iter().map(|validator| {
            ValidationChain::new(record, self.other_field.as_str(), vec![validator.clone()].into())
                .with_run(chain.run().clone())
                .start(Some(test_value.clone()))
        });
        let outcomes = join_all(nested).await;

        let invalid = outcomes.iter().filter(|outcome| !outcome.valid).count();
        tracing::trace!(
            rule = %self.rule,
            field = %self.field,
            other = %self.other_field,
            invalid,
            total = outcomes.len(),
            "branch evaluated"
        );

        if self.branch.stops(invalid, outcomes.len()) {
            chain.stop();
        } else {
            chain.next();
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

pub(crate) fn register(registry: &mut RuleRegistry) {
    registry.insert("if", BranchRule(Branch::All));
    registry.insert("if_any", BranchRule(Branch::Any));
    registry.insert("if_not", BranchRule(Branch::NotAll));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryRecord;
    use crate::shapes::testing::{check_record, compile_err, compile_with, run_record};
    use serde_json::json;

    #[test]
    fn stop_decisions() {
        assert!(!Branch::All.stops(0, 2));
        assert!(Branch::All.stops(1, 2));
        assert!(!Branch::Any.stops(1, 2));
        assert!(Branch::Any.stops(2, 2));
        assert!(Branch::NotAll.stops(1, 2));
        assert!(!Branch::NotAll.stops(2, 2));
    }

    #[tokio::test]
    async fn if_runs_rest_only_when_nested_rules_pass() {
        let record = MemoryRecord::from_value(json!({"status": "open"}));
        let outcome = check_record("if:status:in:open|required", &record).await;
        assert_eq!(outcome.message, "value is required.");

        record.set("status", json!("closed"));
        let outcome = check_record("if:status:in:open|required", &record).await;
        assert!(outcome.valid);
    }

    #[tokio::test]
    async fn if_any_and_if_not() {
        let pipeline = compile_with(json!({
            "if_any": ["status", "in:open", "in:pending"],
            "required": "needed"
        }))
        .unwrap();
        let record = MemoryRecord::from_value(json!({"status": "pending"}));
        assert_eq!(run_record(pipeline.clone(), &record).await.message, "needed");
        record.set("status", json!("done"));
        assert!(run_record(pipeline, &record).await.valid);

        let pipeline = compile_with(json!({
            "if_not": {"field": "status", "rules": "in:done"},
            "required": "needed"
        }))
        .unwrap();
        assert_eq!(run_record(pipeline.clone(), &record).await.message, "");
        record.set("status", json!("open"));
        assert_eq!(run_record(pipeline, &record).await.message, "needed");
    }

    #[tokio::test]
    async fn own_field_uses_working_value() {
        let record = MemoryRecord::from_value(json!({"value": "  "}));
        let outcome = check_record("trim|if::required|min:3", &record).await;
        assert!(outcome.valid);
        assert_eq!(outcome.value, json!(""));
    }

    #[tokio::test]
    async fn nested_rules_do_not_rewrite_outer_value() {
        let record = MemoryRecord::from_value(json!({"value": " x "}));
        let outcome = check_record("if::trim|string", &record).await;
        assert!(outcome.valid);
        assert_eq!(outcome.value, json!(" x "));
    }

    #[test]
    fn configuration_errors() {
        assert!(matches!(compile_err("if"), ConfigError::MissingParams { .. }));
        assert!(matches!(compile_err("if:status"), ConfigError::InvalidParams { .. }));
        assert!(matches!(compile_err("if:status:"), ConfigError::MissingRules(_)));
        assert!(matches!(compile_err("if:nope:required"), ConfigError::UnknownField { .. }));
        assert!(matches!(compile_err("if:status:bogus"), ConfigError::UnknownRule(_)));
        assert!(matches!(
            compile_with(json!({"if": ["status"]})).err(),
            Some(ConfigError::MissingRules(_))
        ));
    }
}
