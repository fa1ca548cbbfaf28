//! # Rulechain
//!
//! Declarative per-field validation for dynamic records. Rules are written as
//! compact strings, lists, or maps, compiled once per schema into pipelines of
//! async validators, and run against live records as one chain per field.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rulechain::prelude::*;
//! use serde_json::json;
//!
//! let schema = Schema::new("tasks", ["title", "status", "due_date"]);
//! let config = ValidationConfig::new()
//!     .rule("title", "trim|required|between:3,80")
//!     .rule("due_date", "if:status:in:open|required|after:today")
//!     .alias("due_date", "Due date");
//!
//! let validator = RecordValidator::new(schema, &config)?;
//! let record = MemoryRecord::from_value(json!({"title": " x ", "status": "open"}));
//!
//! let result = validator.validate(&record).await;
//! assert!(!result.valid);
//! assert_eq!(result.message("due_date"), Some("Due date is required."));
//! ```
//!
//! ## Rule DSL
//!
//! - `rule` or `rule:params`, joined with `|`
//! - `\|` keeps a bar inside a token, `\,` a comma inside a list
//! - `$name` runs a rule the record defines itself
//!
//! ## Errors
//!
//! Bad rule configuration is reported as [`ConfigError`] when the rules are
//! compiled. A record failing its rules is not an error; it is reported
//! through [`ValidationResult`], with at most one message per field.

pub mod chain;
pub mod error;
pub mod expression;
pub mod message;
pub mod params;
pub mod parser;
pub mod record;
pub mod registry;
pub mod shapes;
pub mod validator;
pub mod value;


pub use chain::{
    link_fn, ChainControl, ChainOutcome, ChainState, CompiledValidator, Pipeline, RunState,
    ValidationChain,
};
pub use error::{ConfigError, Result, SaveError};
pub use expression::{Expression, ExpressionParser, ExpressionRegistry};
pub use message::{Aliases, Message, MessageRenderer};
pub use params::RuleParams;
pub use parser::{Compiler, RuleEntry, RuleSpec};
pub use record::{
    CollectionResolver, CustomRuleContext, MemoryCollections, MemoryRecord, Record, RuleOutcome,
    Schema, ValidationEvent,
};
pub use registry::{RuleContext, RuleFactory, RuleRegistry};
pub use validator::{FieldFailure, RecordValidator, ValidationConfig, ValidationResult};
pub use value::TypeTag;

/// Prelude module for rule configuration and record validation
pub mod prelude {
    pub use crate::chain::{ChainControl, CompiledValidator, ValidationChain};
    pub use crate::error::{ConfigError, SaveError};
    pub use crate::message::Message;
    pub use crate::parser::{RuleEntry, RuleSpec};
    pub use crate::record::{
        CollectionResolver, MemoryCollections, MemoryRecord, Record, RuleOutcome, Schema,
    };
    pub use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
    pub use crate::validator::{RecordValidator, ValidationConfig, ValidationResult};
}
