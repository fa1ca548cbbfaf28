//! The rule DSL.
//!
//! A field's rules may be written three ways:
//!
//! ```text
//! "required|email|between:3,100"                  delimited string
//! ["required", "email", "between:3,100"]           ordered list
//! {"required": "Email is needed", "unique": {...}} map of rule to message or input
//! ```
//!
//! Each token is `name` or `name:params`. A `\` before `|` keeps the bar in
//! the token. A name starting with `$` runs a rule defined by the record
//! itself (see [`Record::custom_rule`]).

use crate::chain::{ChainControl, CompiledValidator, Pipeline};
use crate::error::{ConfigError, Result};
use crate::message::{Aliases, Message};
use crate::params::{split_escaped, RuleParams, RULE_DELIMITER, RULE_SEPARATOR};
use crate::record::{CustomRuleContext, Record, RuleOutcome, Schema};
use crate::registry::{RuleContext, RuleRegistry};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Prefix marking a record-defined rule.
pub const CUSTOM_RULE_SIGIL: char = '$';

/// One rule of a map-form specification.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub rule: String,
    pub message: Option<Message>,
    pub input: RuleParams,
}

impl RuleEntry {
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: None,
            input: RuleParams::None,
        }
    }

    pub fn message(mut self, message: impl Into<Message>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn input(mut self, input: impl Into<RuleParams>) -> Self {
        self.input = input.into();
        self
    }

    /// Read a map entry: a string is the message; an object with a `message`
    /// carries `message` and `input`; anything else is the input itself.
    fn from_config(rule: String, value: Value) -> Result<Self> {
        match value {
            Value::String(message) => Ok(Self::new(rule).message(message)),
            Value::Object(mut map) if map.get("message").is_some_and(is_truthy) => {
                let raw = map.remove("message").unwrap_or(Value::Null);
                let message = Message::from_value(&raw).ok_or_else(|| ConfigError::InvalidMessage {
                    rule: rule.clone(),
                    message: raw.to_string(),
                })?;
                let input = map.remove("input").unwrap_or(Value::Null);
                Ok(Self {
                    rule,
                    message: Some(message),
                    input: RuleParams::from_value(input),
                })
            }
            other => Ok(Self::new(rule).input(other)),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false)) && value.as_str() != Some("")
}

/// A field's rule specification.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "Value")]
pub enum RuleSpec {
    Text(String),
    List(Vec<String>),
    Map(Vec<RuleEntry>),
}

impl RuleSpec {
    pub fn entries(entries: impl IntoIterator<Item = RuleEntry>) -> Self {
        RuleSpec::Map(entries.into_iter().collect())
    }
}

impl TryFrom<Value> for RuleSpec {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(RuleSpec::Text(text)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(token) => Ok(token),
                    other => Err(ConfigError::invalid_params("rules", other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(RuleSpec::List),
            Value::Object(map) => map
                .into_iter()
                .map(|(rule, value)| RuleEntry::from_config(rule, value))
                .collect::<Result<Vec<_>>>()
                .map(RuleSpec::Map),
            other => Err(ConfigError::invalid_params("rules", other)),
        }
    }
}

impl From<&str> for RuleSpec {
    fn from(text: &str) -> Self {
        RuleSpec::Text(text.to_string())
    }
}

impl From<String> for RuleSpec {
    fn from(text: String) -> Self {
        RuleSpec::Text(text)
    }
}

impl From<Vec<&str>> for RuleSpec {
    fn from(tokens: Vec<&str>) -> Self {
        RuleSpec::List(tokens.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for RuleSpec {
    fn from(tokens: Vec<String>) -> Self {
        RuleSpec::List(tokens)
    }
}

impl From<Vec<RuleEntry>> for RuleSpec {
    fn from(entries: Vec<RuleEntry>) -> Self {
        RuleSpec::Map(entries)
    }
}

/// Turns rule specifications into compiled pipelines for one schema.
#[derive(Debug, Clone)]
pub struct Compiler<'r> {
    registry: &'r RuleRegistry,
    schema: Schema,
    aliases: Aliases,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r RuleRegistry, schema: Schema, aliases: Aliases) -> Self {
        Self {
            registry,
            schema,
            aliases,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        self.registry
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn aliases(&self) -> &Aliases {
        &self.aliases
    }

    /// Compile a field's rules into a shareable pipeline.
    pub fn compile(&self, spec: &RuleSpec, field: &str, message: Option<&Message>) -> Result<Pipeline> {
        let validators = self.parse_rules(spec, field, message)?;
        tracing::debug!(field, rules = validators.len(), "pipeline compiled");
        Ok(validators.into())
    }

    /// Compile a field's rules in declaration order.
    ///
    /// `message` applies to every rule that has no message of its own.
    pub fn parse_rules(
        &self,
        spec: &RuleSpec,
        field: &str,
        message: Option<&Message>,
    ) -> Result<Vec<Arc<dyn CompiledValidator>>> {
        match spec {
            RuleSpec::Text(text) => split_escaped(text, RULE_DELIMITER)
                .iter()
                .map(|token| token.trim())
                .filter(|token| !token.is_empty())
                .map(|token| self.parse_rule(token, field, message, RuleParams::None))
                .collect(),
            RuleSpec::List(tokens) => tokens
                .iter()
                .map(|token| self.parse_rule(token, field, message, RuleParams::None))
                .collect(),
            RuleSpec::Map(entries) => entries
                .iter()
                .map(|entry| {
                    let message = entry.message.as_ref().or(message);
                    self.parse_rule(&entry.rule, field, message, entry.input.clone())
                })
                .collect(),
        }
    }

    /// Compile one token. A `:params` suffix takes precedence over `input`.
    pub fn parse_rule(
        &self,
        token: &str,
        field: &str,
        message: Option<&Message>,
        input: RuleParams,
    ) -> Result<Arc<dyn CompiledValidator>> {
        let (name, suffix) = match token.split_once(RULE_SEPARATOR) {
            Some((name, suffix)) => (name, Some(suffix)),
            None => (token, None),
        };

        if let Some(custom) = name.strip_prefix(CUSTOM_RULE_SIGIL) {
            return Ok(Arc::new(CustomRuleValidator {
                rule: name.to_string(),
                name: custom.to_string(),
                field: field.to_string(),
                alias: self.aliases.get(field).to_string(),
                message: message.and_then(Message::text).map(String::from),
            }));
        }

        let factory = self
            .registry
            .get(name)
            .ok_or_else(|| ConfigError::UnknownRule(name.to_string()))?;

        let params = match suffix {
            Some(suffix) => RuleParams::Text(suffix.to_string()),
            None => input,
        };

        let ctx = RuleContext {
            rule: name,
            field,
            params,
            message: message.cloned(),
            compiler: self,
        };
        factory.compile(&ctx)
    }
}

/// Runs a rule the record defines for itself.
struct CustomRuleValidator {
    rule: String,
    name: String,
    field: String,
    alias: String,
    message: Option<String>,
}

#[async_trait]
impl CompiledValidator for CustomRuleValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        let ctx = CustomRuleContext {
            field: &self.field,
            alias: &self.alias,
            message: self.message.as_deref(),
        };
        let mut outcome = record.custom_rule(&self.name, &value, &ctx);

        loop {
            match outcome {
                RuleOutcome::Valid => return chain.next(),
                RuleOutcome::Invalid(message) => return chain.invalid(message),
                RuleOutcome::Deferred(pending) => outcome = pending.await,
            }
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}
