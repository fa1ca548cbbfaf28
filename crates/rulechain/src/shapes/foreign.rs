//! Foreign-collection rules: `exists` and `unique`.
//!
//! The collection is either given explicitly or looked up by model name
//! through the schema's [`CollectionResolver`] on every run. A lookup that
//! fails or outlives the schema's lookup timeout lets the value pass.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::message::MessageRenderer;
use crate::params::{split_list, RuleParams};
use crate::record::{same_record, CollectionResolver, Record};
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use crate::value::values_equal;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Shape for rules scanning another collection for a matching field value.
#[derive(Debug, Clone, Copy)]
pub struct ForeignRule {
    message: &'static str,
    /// `true` fails when a match exists (`unique`), `false` when none does
    /// (`exists`).
    fail_on_match: bool,
}

impl ForeignRule {
    pub fn new(message: &'static str, fail_on_match: bool) -> Self {
        Self {
            message,
            fail_on_match,
        }
    }
}

enum Source {
    Records(Vec<Arc<dyn Record>>),
    Resolver {
        resolver: Arc<dyn CollectionResolver>,
        timeout: Option<Duration>,
    },
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|s| !s.is_empty()).map(String::from)
}

impl RuleFactory for ForeignRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        let (model, match_field, records) = match &ctx.params {
            RuleParams::None => (None, None, None),
            RuleParams::Text(text) => {
                let parts = split_list(text, true);
                (
                    non_empty(parts.first().map(String::as_str)),
                    non_empty(parts.get(1).map(String::as_str)),
                    None,
                )
            }
            RuleParams::Value(Value::Array(items)) => (
                non_empty(items.first().and_then(Value::as_str)),
                non_empty(items.get(1).and_then(Value::as_str)),
                None,
            ),
            RuleParams::Value(Value::Object(map)) => (
                non_empty(map.get("model").and_then(Value::as_str)),
                non_empty(map.get("field").and_then(Value::as_str)),
                None,
            ),
            RuleParams::Records {
                model,
                field,
                records,
            } => (model.clone(), field.clone(), Some(records.clone())),
            _ => return Err(ConfigError::invalid_params(ctx.rule, ctx.params.describe())),
        };

        let model = model.unwrap_or_else(|| ctx.schema().name().to_string());
        let match_field = match_field.unwrap_or_else(|| ctx.field.to_string());
        ctx.require_field(&match_field)?;

        let source = match records {
            Some(records) => Source::Records(records),
            None => Source::Resolver {
                resolver: ctx
                    .schema()
                    .collections()
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingCollection(ctx.rule.to_string()))?,
                timeout: ctx.schema().lookup_timeout(),
            },
        };

        let extra = vec![
            ("$class", Value::String(model.clone())),
            ("$matchField", Value::String(match_field.clone())),
            (
                "$matchAlias",
                Value::String(ctx.aliases().get(&match_field).to_string()),
            ),
        ];

        Ok(Arc::new(ForeignValidator {
            rule: ctx.rule.to_string(),
            model,
            match_field,
            source,
            fail_on_match: self.fail_on_match,
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
            extra,
        }))
    }
}

struct ForeignValidator {
    rule: String,
    model: String,
    match_field: String,
    source: Source,
    fail_on_match: bool,
    template: String,
    renderer: MessageRenderer,
    extra: Vec<(&'static str, Value)>,
}

impl ForeignValidator {
    async fn collection(&self, field: &str) -> Option<Vec<Arc<dyn Record>>> {
        let (resolver, timeout) = match &self.source {
            Source::Records(records) => return Some(records.clone()),
            Source::Resolver { resolver, timeout } => (resolver, *timeout),
        };

        let lookup = resolver.all(&self.model);
        let resolved = match timeout {
            Some(limit) => match tokio::time::timeout(limit, lookup).await {
                Ok(resolved) => resolved,
                Err(_) => {
                    tracing::warn!(
                        rule = %self.rule,
                        field,
                        model = %self.model,
                        timeout_ms = limit.as_millis() as u64,
                        "collection lookup timed out, passing value"
                    );
                    return None;
                }
            },
            None => lookup.await,
        };

        match resolved {
            Ok(records) => Some(records),
            Err(error) => {
                tracing::warn!(
                    rule = %self.rule,
                    field,
                    model = %self.model,
                    %error,
                    "collection lookup failed, passing value"
                );
                None
            }
        }
    }
}

#[async_trait]
impl CompiledValidator for ForeignValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        if value.is_null() {
            return chain.next();
        }
        let Some(collection) = self.collection(chain.field()).await else {
            return chain.next();
        };

        let matched = collection.iter().any(|other| {
            !same_record(other.as_ref(), record)
                && values_equal(&value, &other.get(&self.match_field))
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
        "exists",
        ForeignRule::new(
            "{$alias} must match an existing {$matchAlias} in a {$class}",
            false,
        ),
    );
    registry.insert(
        "unique",
        ForeignRule::new("{$alias} must be a unique {$matchAlias} in a {$class}", true),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ValidationChain;
    use crate::message::Aliases;
    use crate::parser::{Compiler, RuleEntry, RuleSpec};
    use crate::record::{MemoryCollections, MemoryRecord, Schema};
    use serde_json::json;

    fn user(email: &str) -> Arc<dyn Record> {
        Arc::new(MemoryRecord::from_value(json!({"email": email})))
    }

    #[tokio::test]
    async fn unique_against_explicit_records_excludes_self() {
        let me = user("ada@example.com");
        let registry = RuleRegistry::standard();
        let compiler = Compiler::new(&registry, Schema::new("users", ["email"]), Aliases::default());
        let spec = RuleSpec::entries([RuleEntry::new("unique").input(RuleParams::Records {
            model: None,
            field: None,
            records: vec![me.clone(), user("grace@example.com")],
        })]);
        let pipeline = compiler.compile(&spec, "email", None).unwrap();

        let outcome = ValidationChain::new(me.as_ref(), "email", pipeline.clone())
            .start(None)
            .await;
        assert!(outcome.valid);

        let outcome = ValidationChain::new(me.as_ref(), "email", pipeline)
            .start(Some(json!("grace@example.com")))
            .await;
        assert_eq!(
            outcome.message,
            "email must be a unique email in a users"
        );
    }

    #[tokio::test]
    async fn exists_against_resolved_model() {
        let collections = MemoryCollections::new();
        collections.insert("teams", Arc::new(MemoryRecord::from_value(json!({"team_id": 7}))));
        let schema = Schema::new("players", ["team_id"]).with_collections(collections);
        let registry = RuleRegistry::standard();
        let compiler = Compiler::new(&registry, schema, Aliases::default());
        let pipeline = compiler.compile(&"exists:teams".into(), "team_id", None).unwrap();

        let record = MemoryRecord::from_value(json!({"team_id": 7}));
        let outcome = ValidationChain::new(&record, "team_id", pipeline.clone())
            .start(None)
            .await;
        assert!(outcome.valid);

        record.set("team_id", json!(8));
        let outcome = ValidationChain::new(&record, "team_id", pipeline)
            .start(None)
            .await;
        assert_eq!(outcome.message, "team_id must match an existing team_id in a teams");
    }

    #[tokio::test]
    async fn null_values_and_failed_lookups_pass() {
        let schema = Schema::new("players", ["team_id"]).with_collections(MemoryCollections::new());
        let registry = RuleRegistry::standard();
        let compiler = Compiler::new(&registry, schema, Aliases::default());
        let pipeline = compiler.compile(&"exists:teams".into(), "team_id", None).unwrap();

        let record = MemoryRecord::from_value(json!({"team_id": 8}));
        let outcome = ValidationChain::new(&record, "team_id", pipeline.clone())
            .start(None)
            .await;
        assert!(outcome.valid);

        let outcome = ValidationChain::new(&record, "team_id", pipeline)
            .start(Some(Value::Null))
            .await;
        assert!(outcome.valid);
    }

    #[test]
    fn configuration_errors() {
        let registry = RuleRegistry::standard();
        let compiler = Compiler::new(&registry, Schema::new("users", ["email"]), Aliases::default());
        assert_eq!(
            compiler.compile(&"unique".into(), "email", None).err(),
            Some(ConfigError::MissingCollection("unique".to_string()))
        );

        let schema = Schema::new("users", ["email"]).with_collections(MemoryCollections::new());
        let compiler = Compiler::new(&registry, schema, Aliases::default());
        assert!(matches!(
            compiler.compile(&"unique:users,mail".into(), "email", None).err(),
            Some(ConfigError::UnknownField { .. })
        ));
    }
}
