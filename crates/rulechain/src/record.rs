//! The host surface the engine validates against.
//!
//! A [`Record`] is one live instance with named fields; a [`Schema`] describes
//! the declared field list and where foreign collections come from.

use crate::validator::ValidationResult;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Default bound on a foreign-collection lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a record-defined (`$name`) rule.
pub enum RuleOutcome {
    /// The value passes; the chain advances.
    Valid,
    /// The value fails with this message.
    Invalid(String),
    /// Not decided yet; the chain waits for the future.
    Deferred(BoxFuture<'static, RuleOutcome>),
}

impl fmt::Debug for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleOutcome::Valid => f.write_str("Valid"),
            RuleOutcome::Invalid(message) => f.debug_tuple("Invalid").field(message).finish(),
            RuleOutcome::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// What a record-defined rule is told about the field it runs for.
#[derive(Debug, Clone)]
pub struct CustomRuleContext<'a> {
    pub field: &'a str,
    pub alias: &'a str,
    pub message: Option<&'a str>,
}

/// A live record instance.
///
/// Implementations must use interior mutability for [`Record::set`] since
/// several field chains hold the record at once.
pub trait Record: Send + Sync {
    /// Current value of a field; `Value::Null` when unset.
    fn get(&self, field: &str) -> Value;

    /// Overwrite a field.
    fn set(&self, field: &str, value: Value);

    /// Run a record-defined rule (`$name` in a rule string).
    fn custom_rule(&self, name: &str, _value: &Value, ctx: &CustomRuleContext<'_>) -> RuleOutcome {
        tracing::warn!(rule = name, field = ctx.field, "record has no custom rule");
        RuleOutcome::Invalid(format!("{} has no custom rule {}", ctx.alias, name))
    }

    /// Called once before a validation run starts.
    fn on_validation_start(&self) {}

    /// Called once when a run finishes and every field passed.
    fn on_validation_pass(&self, _result: &ValidationResult) {}

    /// Called once when a run finishes with at least one failing field.
    fn on_validation_fail(&self, _result: &ValidationResult) {}
}

/// Whether two record references point at the same instance.
pub fn same_record(a: &dyn Record, b: &dyn Record) -> bool {
    std::ptr::eq(
        a as *const dyn Record as *const (),
        b as *const dyn Record as *const (),
    )
}

/// Source of foreign collections for `exists` and `unique`.
#[async_trait]
pub trait CollectionResolver: Send + Sync {
    /// Every known instance of the named model.
    async fn all(&self, model: &str) -> Result<Vec<Arc<dyn Record>>, String>;
}

/// Declared shape of the records being validated.
#[derive(Clone)]
pub struct Schema {
    name: String,
    fields: Arc<[String]>,
    collections: Option<Arc<dyn CollectionResolver>>,
    lookup_timeout: Option<Duration>,
}

impl Schema {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            collections: None,
            lookup_timeout: Some(DEFAULT_LOOKUP_TIMEOUT),
        }
    }

    /// Set the resolver used for named foreign collections.
    pub fn with_collections(mut self, resolver: impl CollectionResolver + 'static) -> Self {
        self.collections = Some(Arc::new(resolver));
        self
    }

    /// Set the resolver from an Arc.
    pub fn with_collections_arc(mut self, resolver: Arc<dyn CollectionResolver>) -> Self {
        self.collections = Some(resolver);
        self
    }

    /// Bound foreign lookups; `None` waits indefinitely.
    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub(crate) fn shared_fields(&self) -> Arc<[String]> {
        self.fields.clone()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    pub fn collections(&self) -> Option<&Arc<dyn CollectionResolver>> {
        self.collections.as_ref()
    }

    pub fn lookup_timeout(&self) -> Option<Duration> {
        self.lookup_timeout
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("has_collections", &self.collections.is_some())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

type CustomRuleFn = Arc<dyn Fn(&Value, &CustomRuleContext<'_>) -> RuleOutcome + Send + Sync>;

/// A record backed by a JSON object.
///
/// Custom rules are registered as closures, and the last validation result
/// and lifecycle events are kept for inspection.
#[derive(Default)]
pub struct MemoryRecord {
    values: Mutex<Map<String, Value>>,
    custom: HashMap<String, CustomRuleFn>,
    last_result: Mutex<Option<ValidationResult>>,
    events: Mutex<Vec<ValidationEvent>>,
}

/// Lifecycle notification observed by a [`MemoryRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationEvent {
    Start,
    Pass,
    Fail,
}

impl MemoryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; other values give an empty record.
    pub fn from_value(value: Value) -> Self {
        let values = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            values: Mutex::new(values),
            ..Self::default()
        }
    }

    /// Register a record-defined rule, invoked by `$name` in a rule spec.
    pub fn with_custom_rule<F>(mut self, name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&Value, &CustomRuleContext<'_>) -> RuleOutcome + Send + Sync + 'static,
    {
        self.custom.insert(name.into(), Arc::new(rule));
        self
    }

    /// Snapshot of all field values.
    pub fn to_value(&self) -> Value {
        Value::Object(lock(&self.values).clone())
    }

    /// Result of the most recent validation run.
    pub fn last_result(&self) -> Option<ValidationResult> {
        lock(&self.last_result).clone()
    }

    /// Whether the most recent run passed; `None` before the first run.
    pub fn is_valid(&self) -> Option<bool> {
        lock(&self.last_result).as_ref().map(|r| r.valid)
    }

    pub fn events(&self) -> Vec<ValidationEvent> {
        lock(&self.events).clone()
    }

    fn finish(&self, event: ValidationEvent, result: &ValidationResult) {
        lock(&self.events).push(event);
        *lock(&self.last_result) = Some(result.clone());
    }
}

impl Record for MemoryRecord {
    fn get(&self, field: &str) -> Value {
        lock(&self.values).get(field).cloned().unwrap_or(Value::Null)
    }

    fn set(&self, field: &str, value: Value) {
        lock(&self.values).insert(field.to_string(), value);
    }

    fn custom_rule(&self, name: &str, value: &Value, ctx: &CustomRuleContext<'_>) -> RuleOutcome {
        match self.custom.get(name) {
            Some(rule) => rule(value, ctx),
            None => {
                tracing::warn!(rule = name, field = ctx.field, "record has no custom rule");
                RuleOutcome::Invalid(format!("{} has no custom rule {}", ctx.alias, name))
            }
        }
    }

    fn on_validation_start(&self) {
        lock(&self.events).push(ValidationEvent::Start);
    }

    fn on_validation_pass(&self, result: &ValidationResult) {
        self.finish(ValidationEvent::Pass, result);
    }

    fn on_validation_fail(&self, result: &ValidationResult) {
        self.finish(ValidationEvent::Fail, result);
    }
}

impl fmt::Debug for MemoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecord")
            .field("values", &*lock(&self.values))
            .field("custom_rules", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// In-memory foreign collections keyed by model name.
#[derive(Clone, Default)]
pub struct MemoryCollections {
    models: Arc<RwLock<HashMap<String, Vec<Arc<dyn Record>>>>>,
}

impl MemoryCollections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance to a model's collection.
    pub fn insert(&self, model: &str, record: Arc<dyn Record>) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models.entry(model.to_string()).or_default().push(record);
    }
}

#[async_trait]
impl CollectionResolver for MemoryCollections {
    async fn all(&self, model: &str) -> Result<Vec<Arc<dyn Record>>, String> {
        let models = self
            .models
            .read()
            .map_err(|_| "Lock poisoned".to_string())?;
        models
            .get(model)
            .cloned()
            .ok_or_else(|| format!("unknown model {model}"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
