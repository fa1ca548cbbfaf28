//! Transforms: rules that rewrite the working value and never fail.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::expression::{end_of_day, parse_date, start_of_day};
use crate::params::{parse_float, parse_float_str, RuleParams};
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use crate::value::{display_value, number};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// A value rewrite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Abs,
    Ceil,
    Floor,
    Round,
    Mod(f64),
    Trim,
    /// Drop null items from arrays and null entries from objects.
    Filter,
    StripTags,
    StripEnts,
    Base64,
    Unbase64,
    StartOfDay,
    EndOfDay,
    /// Write the working value back to the record.
    Apply,
    /// Clear the field on the record and in the chain.
    Null,
}

/// Shape registering one [`Transform`] under a rule name.
#[derive(Debug, Clone, Copy)]
pub struct TransformRule(pub Transform);

impl RuleFactory for TransformRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        let transform = match self.0 {
            Transform::Mod(_) => {
                let divisor = match &ctx.params {
                    RuleParams::Text(text) => parse_float_str(text),
                    RuleParams::Value(value) => parse_float(value),
                    _ => None,
                };
                Transform::Mod(divisor.ok_or_else(|| ConfigError::InvalidNumber {
                    rule: ctx.rule.to_string(),
                    params: ctx.params.describe(),
                })?)
            }
            other => {
                ctx.expect_no_params()?;
                other
            }
        };

        Ok(Arc::new(TransformValidator {
            rule: ctx.rule.to_string(),
            field: ctx.field.to_string(),
            transform,
        }))
    }
}

struct TransformValidator {
    rule: String,
    field: String,
    transform: Transform,
}

fn tags_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"(?s)<.*?>").expect("tag regex is valid"))
}

fn entities_regex() -> &'static Regex {
    static ENTITIES: OnceLock<Regex> = OnceLock::new();
    ENTITIES.get_or_init(|| Regex::new(r"(?i)&[a-z]+;").expect("entity regex is valid"))
}

fn numeric(value: &Value, f: impl Fn(f64) -> f64) -> Option<Value> {
    parse_float(value).map(|n| number(f(n)))
}

fn text(value: &Value, f: impl Fn(&str) -> String) -> Option<Value> {
    value.as_str().map(|s| Value::String(f(s)))
}

fn round_half_up(n: f64) -> f64 {
    (n + 0.5).floor()
}

impl Transform {
    /// The rewritten value, or `None` to leave it as it is.
    pub fn apply(&self, value: &Value) -> Option<Value> {
        match self {
            Transform::Abs => numeric(value, f64::abs),
            Transform::Ceil => numeric(value, f64::ceil),
            Transform::Floor => numeric(value, f64::floor),
            Transform::Round => numeric(value, round_half_up),
            Transform::Mod(divisor) => numeric(value, |n| n % divisor),
            Transform::Trim => text(value, |s| s.trim().to_string()),
            Transform::StripTags => text(value, |s| tags_regex().replace_all(s, "").into_owned()),
            Transform::StripEnts => {
                text(value, |s| entities_regex().replace_all(s, "").into_owned())
            }
            Transform::Filter => match value {
                Value::Array(items) => Some(Value::Array(
                    items.iter().filter(|item| !item.is_null()).cloned().collect(),
                )),
                Value::Object(map) => Some(Value::Object(
                    map.iter()
                        .filter(|(_, item)| !item.is_null())
                        .map(|(key, item)| (key.clone(), item.clone()))
                        .collect(),
                )),
                _ => None,
            },
            Transform::Base64 => Some(Value::String(STANDARD.encode(display_value(value)))),
            Transform::Unbase64 => value
                .as_str()
                .and_then(|encoded| STANDARD.decode(encoded.trim()).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .map(Value::String),
            Transform::StartOfDay => parse_date(value).and_then(start_of_day).map(Value::from),
            Transform::EndOfDay => parse_date(value).and_then(end_of_day).map(Value::from),
            Transform::Apply => None,
            Transform::Null => Some(Value::Null),
        }
    }
}

#[async_trait]
impl CompiledValidator for TransformValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        match self.transform {
            Transform::Apply => record.set(&self.field, value.clone()),
            Transform::Null => record.set(&self.field, Value::Null),
            _ => {}
        }
        if let Some(rewritten) = self.transform.apply(&value) {
            chain.update(rewritten);
        }
        chain.next();
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

pub(crate) fn register(registry: &mut RuleRegistry) {
    for (name, transform) in [
        ("abs", Transform::Abs),
        ("ceil", Transform::Ceil),
        ("floor", Transform::Floor),
        ("round", Transform::Round),
        ("mod", Transform::Mod(1.0)),
        ("trim", Transform::Trim),
        ("filter", Transform::Filter),
        ("stripTags", Transform::StripTags),
        ("stripEnts", Transform::StripEnts),
        ("base64", Transform::Base64),
        ("unbase64", Transform::Unbase64),
        ("startOfDay", Transform::StartOfDay),
        ("endOfDay", Transform::EndOfDay),
        ("apply", Transform::Apply),
        ("null", Transform::Null),
    ] {
        registry.insert(name, TransformRule(transform));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::MILLIS_PER_DAY;
    use crate::shapes::testing::{check, check_record, compile_err};
    use crate::record::MemoryRecord;
    use serde_json::json;

    #[tokio::test]
    async fn numeric_transforms() {
        assert_eq!(check("abs", json!("-3.5")).await.value, json!(3.5));
        assert_eq!(check("ceil", json!(1.2)).await.value, json!(2));
        assert_eq!(check("floor", json!(-1.2)).await.value, json!(-2));
        assert_eq!(check("round", json!(2.5)).await.value, json!(3));
        assert_eq!(check("round", json!(-2.5)).await.value, json!(-2));
        assert_eq!(check("mod:3", json!(7)).await.value, json!(1));

        let untouched = check("abs", json!("n/a")).await;
        assert!(untouched.valid && !untouched.updated);
    }

    #[tokio::test]
    async fn text_transforms() {
        assert_eq!(check("trim", json!("  hi ")).await.value, json!("hi"));
        assert_eq!(
            check("stripTags", json!("<b>bold</b>\n<i\n>x</i>")).await.value,
            json!("bold\nx")
        );
        assert_eq!(check("stripEnts", json!("a&amp;b&NBSP;")).await.value, json!("ab"));
        assert_eq!(check("base64", json!("hello")).await.value, json!("aGVsbG8="));
        assert_eq!(check("unbase64", json!("aGVsbG8=")).await.value, json!("hello"));
        assert!(!check("unbase64", json!("%%%")).await.updated);
    }

    #[tokio::test]
    async fn filter_drops_nulls() {
        assert_eq!(check("filter", json!([1, null, 2])).await.value, json!([1, 2]));
        assert_eq!(
            check("filter", json!({"a": null, "b": 1})).await.value,
            json!({"b": 1})
        );
    }

    #[tokio::test]
    async fn day_boundaries() {
        let noon = MILLIS_PER_DAY + MILLIS_PER_DAY / 2;
        assert_eq!(check("startOfDay", json!(noon)).await.value, json!(MILLIS_PER_DAY));
        assert_eq!(
            check("endOfDay", json!("1970-01-02")).await.value,
            json!(2 * MILLIS_PER_DAY - 1)
        );
    }

    #[tokio::test]
    async fn day_transforms_leave_huge_numbers_alone() {
        for value in [json!(1e300), json!(-1e300), json!(i64::MIN)] {
            for rule in ["startOfDay", "endOfDay"] {
                let outcome = check(rule, value.clone()).await;
                assert!(outcome.valid && !outcome.updated, "{rule} {value}");
            }
        }
        let before_epoch = check("startOfDay", json!(-1)).await;
        assert_eq!(before_epoch.value, json!(-MILLIS_PER_DAY));
    }

    #[tokio::test]
    async fn apply_and_null_touch_the_record() {
        let record = MemoryRecord::from_value(json!({"value": "  padded  "}));
        let outcome = check_record("trim|apply", &record).await;
        assert_eq!(outcome.value, json!("padded"));
        assert_eq!(record.get("value"), json!("padded"));

        let outcome = check_record("null", &record).await;
        assert_eq!(outcome.value, Value::Null);
        assert_eq!(record.get("value"), Value::Null);
    }

    #[test]
    fn transform_params() {
        assert!(matches!(compile_err("mod:x"), ConfigError::InvalidNumber { .. }));
        assert!(matches!(compile_err("mod"), ConfigError::InvalidNumber { .. }));
        assert!(matches!(compile_err("trim:all"), ConfigError::UnexpectedParams { .. }));
    }
}
