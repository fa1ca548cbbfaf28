//! Date comparison rules: `after`, `after_on`, `before`, `before_on`.
//!
//! The parameter is a date expression resolved through the registry's
//! expression parsers. A value that parses as a date is rewritten to its
//! timestamp; values that do not parse are left alone and pass.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::expression::{parse_date, Expression};
use crate::message::MessageRenderer;
use crate::params::RuleParams;
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Shape comparing a date value against a date expression.
#[derive(Debug, Clone, Copy)]
pub struct DateRule {
    message: &'static str,
    /// `(value, date)` in milliseconds; `true` fails the value.
    is_invalid: fn(i64, i64) -> bool,
}

impl DateRule {
    pub fn new(message: &'static str, is_invalid: fn(i64, i64) -> bool) -> Self {
        Self {
            message,
            is_invalid,
        }
    }
}

impl RuleFactory for DateRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        if ctx.params.is_none() {
            return Err(ConfigError::missing_params(ctx.rule, "a date expression argument"));
        }
        let invalid = || ConfigError::InvalidExpression {
            rule: ctx.rule.to_string(),
            params: ctx.params.describe(),
        };

        let expression: Expression = match &ctx.params {
            RuleParams::Text(text) => ctx.expressions().parse(text, ctx.schema())?.ok_or_else(invalid)?,
            RuleParams::Expression(expression) => expression.clone(),
            RuleParams::Value(value) => {
                let time = parse_date(value).ok_or_else(invalid)?;
                let fixed: Expression = Arc::new(move |_: &Value, _: &dyn Record| Some(time));
                fixed
            }
            _ => return Err(invalid()),
        };

        Ok(Arc::new(DateValidator {
            rule: ctx.rule.to_string(),
            expression,
            is_invalid: self.is_invalid,
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
            extra: vec![("$date", ctx.params.display())],
        }))
    }
}

struct DateValidator {
    rule: String,
    expression: Expression,
    is_invalid: fn(i64, i64) -> bool,
    template: String,
    renderer: MessageRenderer,
    extra: Vec<(&'static str, Value)>,
}

#[async_trait]
impl CompiledValidator for DateValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        let Some(time) = parse_date(&value) else {
            return chain.next();
        };
        let time_value = Value::from(time);
        chain.update(time_value.clone());

        match (self.expression)(&time_value, record) {
            Some(date) if (self.is_invalid)(time, date) => {
                chain.invalid(self.renderer.render(&self.template, &time_value, record, &self.extra))
            }
            _ => chain.next(),
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

pub(crate) fn register(registry: &mut RuleRegistry) {
    use crate::expression::end_of_day;

    registry.insert(
        "after",
        DateRule::new("{$alias} must be after {$date}.", |value, date| {
            end_of_day(date).is_some_and(|end| value < end)
        }),
    );
    registry.insert(
        "after_on",
        DateRule::new("{$alias} must be after or equal to {$date}.", |value, date| {
            value < date
        }),
    );
    registry.insert(
        "before",
        DateRule::new("{$alias} must be before {$date}.", |value, date| value > date),
    );
    registry.insert(
        "before_on",
        DateRule::new("{$alias} must be before or equal to {$date}.", |value, date| {
            end_of_day(date).is_some_and(|end| value > end)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::MILLIS_PER_DAY;
    use crate::record::MemoryRecord;
    use crate::shapes::testing::{check, check_record, compile_err};
    use serde_json::json;

    #[tokio::test]
    async fn after_compares_with_end_of_day() {
        let outcome = check("after:2024-01-31", json!("2024-01-31T12:00:00Z")).await;
        assert_eq!(outcome.message, "value must be after 2024-01-31.");
        assert!(check("after:2024-01-31", json!("2024-02-01")).await.valid);
        assert!(check("after_on:2024-01-31", json!("2024-01-31T12:00:00Z")).await.valid);
        assert!(!check("after_on:2024-01-31", json!("2024-01-30")).await.valid);
    }

    #[tokio::test]
    async fn before_variants() {
        assert!(!check("before:2024-01-31", json!("2024-01-31T12:00:00Z")).await.valid);
        assert!(check("before_on:2024-01-31", json!("2024-01-31T12:00:00Z")).await.valid);
        assert!(!check("before_on:2024-01-31", json!("2024-02-01")).await.valid);
    }

    #[tokio::test]
    async fn value_is_rewritten_to_timestamp() {
        let outcome = check("after_on:1970-01-01", json!("1970-01-02")).await;
        assert!(outcome.valid);
        assert_eq!(outcome.value, json!(MILLIS_PER_DAY));

        let outcome = check("after:today", json!("whenever")).await;
        assert!(outcome.valid && !outcome.updated);
    }

    #[tokio::test]
    async fn relative_and_field_expressions() {
        assert!(!check("after:today", json!("2000-01-01")).await.valid);
        assert!(check("before:+1days", json!("2000-01-01")).await.valid);

        let record = MemoryRecord::from_value(json!({
            "value": "2024-03-02",
            "other": "2024-03-01"
        }));
        assert!(check_record("after:other", &record).await.valid);
        record.set("value", json!("2024-03-01T06:00:00Z"));
        assert!(!check_record("after:other", &record).await.valid);
    }

    #[tokio::test]
    async fn huge_numbers_are_not_dates() {
        let outcome = check("after:2024-01-31", json!(1e300)).await;
        assert!(outcome.valid && !outcome.updated);

        let record = MemoryRecord::from_value(json!({"value": "2024-03-02", "other": 1e300}));
        assert!(check_record("after:other", &record).await.valid);
        record.set("other", json!(-1e300));
        assert!(check_record("before_on:other", &record).await.valid);
    }

    #[test]
    fn bad_expressions() {
        assert!(matches!(compile_err("after"), ConfigError::MissingParams { .. }));
        assert!(matches!(
            compile_err("after:someday"),
            ConfigError::InvalidExpression { .. }
        ));
        assert!(matches!(compile_err("after:+2eons"), ConfigError::InvalidUnit(_)));
        assert!(matches!(
            compile_err("before:+99999999999999999999days"),
            ConfigError::OffsetOutOfRange(_)
        ));
    }
}
