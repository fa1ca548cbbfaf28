//! Whole-record validation.
//!
//! A [`RecordValidator`] compiles every field's rules once from a
//! [`ValidationConfig`] and then validates any number of records against them.
//! Each run starts one chain per field, waits for all of them, and reports a
//! single [`ValidationResult`].

use crate::chain::{ChainOutcome, Pipeline, RunState, ValidationChain};
use crate::error::{ConfigError, Result, SaveError};
use crate::message::{Aliases, Message};
use crate::parser::{Compiler, RuleSpec};
use crate::record::{Record, Schema};
use crate::registry::RuleRegistry;
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;

/// Validation setup for one schema.
///
/// ## Example
///
/// ```rust,ignore
/// let config = ValidationConfig::new()
///     .rule("email", "required|email")
///     .rule("name", "required|between:2,40")
///     .alias("name", "Full name")
///     .required(true);
/// ```
///
/// It also deserializes from JSON, keeping the declaration order of fields:
///
/// ```json
/// {
///   "rules": {"email": "required|email", "name": ["required", "min:2"]},
///   "messages": {"email": "We need a working email"},
///   "aliases": {"name": "Full name"},
///   "required": true
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct ValidationConfig {
    /// Field to rules, in declaration order.
    pub rules: Vec<(String, RuleSpec)>,
    /// Field-level messages used by rules that have none of their own.
    pub messages: HashMap<String, Message>,
    /// Display names used by `{$alias}` and field lists in messages.
    pub aliases: HashMap<String, String>,
    /// Gate saves on the record being valid.
    pub required: bool,
}

impl ValidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the rules of a field.
    pub fn rule(mut self, field: impl Into<String>, spec: impl Into<RuleSpec>) -> Self {
        let field = field.into();
        let spec = spec.into();
        match self.rules.iter_mut().find(|(name, _)| *name == field) {
            Some((_, existing)) => *existing = spec,
            None => self.rules.push((field, spec)),
        }
        self
    }

    pub fn message(mut self, field: impl Into<String>, message: impl Into<Message>) -> Self {
        self.messages.insert(field.into(), message.into());
        self
    }

    pub fn alias(mut self, field: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aliases.insert(field.into(), alias.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    rules: Map<String, Value>,
    #[serde(default)]
    messages: HashMap<String, Message>,
    #[serde(default)]
    aliases: HashMap<String, String>,
    #[serde(default)]
    required: bool,
}

impl TryFrom<RawConfig> for ValidationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let rules = raw
            .rules
            .into_iter()
            .map(|(field, spec)| Ok((field, RuleSpec::try_from(spec)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            messages: raw.messages,
            aliases: raw.aliases,
            required: raw.required,
        })
    }
}

/// The failure of one field in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldFailure {
    /// Rule that failed the field; `None` for failures not tied to a rule.
    pub rule: Option<String>,
    pub message: String,
}

/// Aggregate outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    /// Failing fields only.
    pub fields: BTreeMap<String, FieldFailure>,
    /// Failure messages in field declaration order.
    pub messages: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            valid: true,
            fields: BTreeMap::new(),
            messages: Vec::new(),
        }
    }
}

impl ValidationResult {
    /// Build from chain outcomes given in field declaration order.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = ChainOutcome>) -> Self {
        let mut result = Self::default();
        for outcome in outcomes.into_iter().filter(|outcome| !outcome.valid) {
            result.valid = false;
            result.messages.push(outcome.message.clone());
            result.fields.insert(
                outcome.field,
                FieldFailure {
                    rule: outcome.rule,
                    message: outcome.message,
                },
            );
        }
        result
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The message a field failed with.
    pub fn message(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|failure| failure.message.as_str())
    }

    pub fn has_failed(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Field to message map, the form most hosts display.
    pub fn field_messages(&self) -> HashMap<&str, &str> {
        self.fields
            .iter()
            .map(|(field, failure)| (field.as_str(), failure.message.as_str()))
            .collect()
    }
}

/// Compiled validation for one schema.
pub struct RecordValidator {
    schema: Schema,
    fields: Vec<(String, Pipeline)>,
    required: bool,
}

impl RecordValidator {
    /// Compile `config` against the shared standard registry.
    pub fn new(schema: Schema, config: &ValidationConfig) -> Result<Self> {
        Self::with_registry(RuleRegistry::global(), schema, config)
    }

    /// Compile `config` against a specific registry.
    ///
    /// Any configuration problem in any field fails the whole compile.
    pub fn with_registry(registry: &RuleRegistry, schema: Schema, config: &ValidationConfig) -> Result<Self> {
        let compiler = Compiler::new(registry, schema, Aliases::new(config.aliases.clone()));

        let fields = config
            .rules
            .iter()
            .map(|(field, spec)| {
                let pipeline = compiler.compile(spec, field, config.messages.get(field))?;
                Ok((field.clone(), pipeline))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            schema = %compiler.schema().name(),
            fields = fields.len(),
            required = config.required,
            "record validator compiled"
        );

        Ok(Self {
            schema: compiler.schema().clone(),
            fields,
            required: config.required,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The compiled pipeline of a field.
    pub fn pipeline(&self, field: &str) -> Option<&Pipeline> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, pipeline)| pipeline)
    }

    /// Validated fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(field, _)| field.as_str())
    }

    /// Whether saves are gated on validity.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Run every field's chain against `record` and wait for all of them.
    ///
    /// The record's start hook fires before any chain starts, and exactly one
    /// of its pass or fail hooks fires after the last chain ends.
    pub async fn validate(&self, record: &dyn Record) -> ValidationResult {
        record.on_validation_start();
        tracing::debug!(
            schema = %self.schema.name(),
            fields = self.fields.len(),
            "validation started"
        );

        let run = RunState::new();
        let chains = self.fields.iter().map(|(field, pipeline)| {
            let run = run.clone();
            ValidationChain::new(record, field.as_str(), pipeline.clone())
                .with_run(run.clone())
                .start(None)
                .map(move |outcome| {
                    if !outcome.valid {
                        run.record_failure(&outcome.field, &outcome.message);
                    }
                    outcome
                })
        });
        let result = ValidationResult::from_outcomes(join_all(chains).await);

        tracing::debug!(
            schema = %self.schema.name(),
            valid = result.valid,
            failures = result.fields.len(),
            "validation finished"
        );
        if result.valid {
            record.on_validation_pass(&result);
        } else {
            record.on_validation_fail(&result);
        }
        result
    }

    /// Run one field's chain on its own, without lifecycle hooks.
    pub async fn validate_field(&self, record: &dyn Record, field: &str) -> Option<ChainOutcome> {
        let pipeline = self.pipeline(field)?.clone();
        Some(ValidationChain::new(record, field, pipeline).start(None).await)
    }

    /// Save through `persist`, validating first when saves are gated.
    ///
    /// An invalid record is never handed to `persist`.
    pub async fn save<F, Fut, T, E>(
        &self,
        record: &dyn Record,
        persist: F,
    ) -> std::result::Result<T, SaveError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if self.required {
            let result = self.validate(record).await;
            if !result.valid {
                tracing::debug!(
                    schema = %self.schema.name(),
                    failures = result.fields.len(),
                    "save blocked by validation"
                );
                return Err(SaveError::Invalid(result));
            }
        }
        persist().await.map_err(SaveError::Save)
    }
}

impl fmt::Debug for RecordValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordValidator")
            .field("schema", &self.schema)
            .field(
                "fields",
                &self
                    .fields
                    .iter()
                    .map(|(field, pipeline)| (field.as_str(), pipeline.len()))
                    .collect::<Vec<_>>(),
            )
            .field("required", &self.required)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemoryRecord, ValidationEvent};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new("users", ["name", "email", "password", "password_confirmation", "age"])
    }

    #[tokio::test]
    async fn join_reports_only_failing_fields() {
        let config = ValidationConfig::new()
            .rule("name", "required")
            .rule("email", "required");
        let validator = RecordValidator::new(schema(), &config).unwrap();
        let record = MemoryRecord::from_value(json!({"name": "", "email": "ok"}));

        let result = validator.validate(&record).await;
        assert!(!result.valid);
        assert_eq!(result.message("name"), Some("name is required."));
        assert!(!result.has_failed("email"));
        assert_eq!(result.messages, vec!["name is required."]);
        assert_eq!(result.fields["name"].rule.as_deref(), Some("required"));
    }

    #[tokio::test]
    async fn lifecycle_hooks_fire_once_per_run() {
        let config = ValidationConfig::new().rule("name", "required");
        let validator = RecordValidator::new(schema(), &config).unwrap();
        let record = MemoryRecord::new();

        validator.validate(&record).await;
        record.set("name", json!("Ada"));
        validator.validate(&record).await;

        assert_eq!(
            record.events(),
            vec![
                ValidationEvent::Start,
                ValidationEvent::Fail,
                ValidationEvent::Start,
                ValidationEvent::Pass
            ]
        );
        assert_eq!(record.is_valid(), Some(true));
        assert!(record.last_result().unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn empty_config_is_valid() {
        let validator = RecordValidator::new(schema(), &ValidationConfig::new()).unwrap();
        let result = validator.validate(&MemoryRecord::new()).await;
        assert_eq!(result, ValidationResult::default());
    }

    #[tokio::test]
    async fn if_valid_sees_earlier_failures() {
        let config = ValidationConfig::new()
            .rule("password", "required|min:8")
            .rule("password_confirmation", "if_valid:password|confirmed:password");
        let validator = RecordValidator::new(schema(), &config).unwrap();
        let record = MemoryRecord::from_value(json!({
            "password": "short",
            "password_confirmation": "different"
        }));

        let result = validator.validate(&record).await;
        assert_eq!(result.fields.len(), 1);
        assert!(result.has_failed("password"));
    }

    #[tokio::test]
    async fn aliases_and_field_messages() {
        let config = ValidationConfig::new()
            .rule("name", "required|min:2")
            .message("name", "{$alias} looks wrong")
            .rule("email", "required")
            .alias("email", "Email address");
        let validator = RecordValidator::new(schema(), &config).unwrap();

        let result = validator.validate(&MemoryRecord::new()).await;
        assert_eq!(result.message("name"), Some("name looks wrong"));
        assert_eq!(result.message("email"), Some("Email address is required."));
    }

    #[test]
    fn compile_failure_in_any_field_fails() {
        let config = ValidationConfig::new()
            .rule("name", "required")
            .rule("email", "required|bogus");
        assert_eq!(
            RecordValidator::new(schema(), &config).err(),
            Some(ConfigError::UnknownRule("bogus".to_string()))
        );
    }

    #[test]
    fn config_from_json_keeps_order() {
        let config: ValidationConfig = serde_json::from_value(json!({
            "rules": {
                "name": "required",
                "email": ["required", "email"],
                "age": {"min": 18}
            },
            "messages": {"age": {"number": "too young"}},
            "aliases": {"email": "Email"},
            "required": true
        }))
        .unwrap();

        let fields: Vec<&str> = config.rules.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, vec!["name", "email", "age"]);
        assert!(config.required);
        assert_eq!(config.aliases["email"], "Email");

        let validator = RecordValidator::new(schema(), &config).unwrap();
        assert_eq!(validator.pipeline("email").map(|p| p.len()), Some(2));
        assert!(validator.is_required());
    }

    #[test]
    fn bad_rules_in_json_fail_deserialization() {
        let parsed: std::result::Result<ValidationConfig, _> =
            serde_json::from_value(json!({"rules": {"name": 3}}));
        assert!(parsed.is_err());
    }

    #[test]
    fn builder_replaces_field_rules() {
        let config = ValidationConfig::new()
            .rule("name", "required")
            .rule("email", "email")
            .rule("name", "min:2");
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].0, "name");
        assert!(matches!(&config.rules[0].1, RuleSpec::Text(t) if t == "min:2"));
    }

    #[tokio::test]
    async fn save_gate_blocks_invalid_records() {
        let config = ValidationConfig::new().rule("name", "required").required(true);
        let validator = RecordValidator::new(schema(), &config).unwrap();
        let record = MemoryRecord::new();

        let saved = validator
            .save(&record, || async { Ok::<_, std::io::Error>("saved") })
            .await;
        let Err(SaveError::Invalid(result)) = saved else {
            panic!("save should be blocked");
        };
        assert!(result.has_failed("name"));

        record.set("name", json!("Ada"));
        let saved = validator
            .save(&record, || async { Ok::<_, std::io::Error>("saved") })
            .await;
        assert_eq!(saved.ok(), Some("saved"));
    }

    #[tokio::test]
    async fn ungated_save_skips_validation() {
        let config = ValidationConfig::new().rule("name", "required");
        let validator = RecordValidator::new(schema(), &config).unwrap();
        let record = MemoryRecord::new();

        let saved = validator
            .save(&record, || async { Err::<(), _>("disk full") })
            .await;
        assert!(matches!(saved, Err(SaveError::Save("disk full"))));
        assert!(record.events().is_empty());
    }

    #[tokio::test]
    async fn single_field_run() {
        let config = ValidationConfig::new().rule("name", "trim|required");
        let validator = RecordValidator::new(schema(), &config).unwrap();
        let record = MemoryRecord::from_value(json!({"name": "  Ada "}));

        let outcome = validator.validate_field(&record, "name").await.unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.value, json!("Ada"));
        assert!(validator.validate_field(&record, "email").await.is_none());
        assert!(record.events().is_empty());
    }
}
