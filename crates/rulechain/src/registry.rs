//! Rule name to factory mapping.
//!
//! The registry is built once and then only read. [`RuleRegistry::standard`]
//! holds every built-in rule; [`RuleRegistry::global`] is a process-wide copy of
//! it for callers that do not need an isolated registry.

use crate::chain::CompiledValidator;
use crate::error::{ConfigError, Result};
use crate::expression::ExpressionRegistry;
use crate::message::{Aliases, Message, MessageRenderer};
use crate::params::RuleParams;
use crate::parser::Compiler;
use crate::record::Schema;
use crate::shapes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Everything a factory gets when compiling one rule for one field.
pub struct RuleContext<'c> {
    /// Rule name as written in the rules.
    pub rule: &'c str,
    /// Field the rule is attached to.
    pub field: &'c str,
    pub params: RuleParams,
    /// Explicit message; `None` uses the rule's default.
    pub message: Option<Message>,
    pub(crate) compiler: &'c Compiler<'c>,
}

impl<'c> RuleContext<'c> {
    pub fn schema(&self) -> &Schema {
        self.compiler.schema()
    }

    pub fn aliases(&self) -> &Aliases {
        self.compiler.aliases()
    }

    pub fn compiler(&self) -> &Compiler<'c> {
        self.compiler
    }

    pub fn expressions(&self) -> &ExpressionRegistry {
        self.compiler.registry().expressions()
    }

    /// Renderer bound to this field.
    pub fn renderer(&self) -> MessageRenderer {
        MessageRenderer::new(self.field, self.aliases(), self.schema().shared_fields())
    }

    /// The explicit message, or `default`.
    pub fn template(&self, default: &str) -> String {
        self.message
            .as_ref()
            .and_then(Message::text)
            .unwrap_or(default)
            .to_string()
    }

    /// Reject any parameters for rules that take none.
    pub fn expect_no_params(&self) -> Result<()> {
        if self.params.is_none() {
            Ok(())
        } else {
            Err(ConfigError::UnexpectedParams {
                rule: self.rule.to_string(),
                field: self.field.to_string(),
            })
        }
    }

    /// Require `field` to be declared by the schema.
    pub fn require_field(&self, field: &str) -> Result<()> {
        if self.schema().has_field(field) {
            Ok(())
        } else {
            Err(ConfigError::unknown_field(self.rule, field))
        }
    }
}

/// Compiles one rule occurrence into a pipeline link.
pub trait RuleFactory: Send + Sync {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>>;
}

impl<F> RuleFactory for F
where
    F: Fn(&RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> + Send + Sync,
{
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        self(ctx)
    }
}

/// Named rule factories plus the expression parsers used by date rules.
#[derive(Clone)]
pub struct RuleRegistry {
    rules: HashMap<String, Arc<dyn RuleFactory>>,
    expressions: ExpressionRegistry,
}

impl RuleRegistry {
    /// A registry with no rules and the standard expression parsers.
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
            expressions: ExpressionRegistry::standard(),
        }
    }

    /// A registry holding every built-in rule.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        shapes::register_standard(&mut registry);
        registry
    }

    /// The shared standard registry.
    pub fn global() -> &'static RuleRegistry {
        static GLOBAL: OnceLock<RuleRegistry> = OnceLock::new();
        GLOBAL.get_or_init(RuleRegistry::standard)
    }

    /// Add a named rule. Names are unique; registering one twice is an error.
    pub fn register(&mut self, name: impl Into<String>, factory: impl RuleFactory + 'static) -> Result<()> {
        let name = name.into();
        if self.rules.contains_key(&name) {
            return Err(ConfigError::DuplicateRule(name));
        }
        tracing::trace!(rule = %name, "rule registered");
        self.rules.insert(name, Arc::new(factory));
        Ok(())
    }

    pub(crate) fn insert(&mut self, name: &str, factory: impl RuleFactory + 'static) {
        self.rules.insert(name.to_string(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn RuleFactory>> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn expressions(&self) -> &ExpressionRegistry {
        &self.expressions
    }

    pub fn expressions_mut(&mut self) -> &mut ExpressionRegistry {
        &mut self.expressions
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("RuleRegistry")
            .field("rules", &names)
            .field("expressions", &self.expressions)
            .finish()
    }
}
