//! Error types for rule compilation and the save gate.
//!
//! Only configuration problems are errors. A record failing its rules is an
//! ordinary outcome and is reported through
//! [`ValidationResult`](crate::ValidationResult) instead.

use crate::validator::ValidationResult;
use thiserror::Error;

/// A rule specification that cannot be compiled into a pipeline.
///
/// Raised while a schema's rules are being compiled, never while a record is
/// being validated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not a valid rule")]
    UnknownRule(String),

    #[error("the rule {rule} for field {field} has no arguments")]
    UnexpectedParams { rule: String, field: String },

    #[error("{rule} validation rule requires {expected}")]
    MissingParams { rule: String, expected: &'static str },

    #[error("{params} is not a valid argument for the {rule} rule")]
    InvalidParams { rule: String, params: String },

    #[error("{field} is not a valid field for the {rule} rule")]
    UnknownField { rule: String, field: String },

    #[error("\"{params}\" is not a valid number for the {rule} rule")]
    InvalidNumber { rule: String, params: String },

    #[error("{params} is not a valid range of numbers for the {rule} rule")]
    InvalidRange { rule: String, params: String },

    #[error("{params} is not a valid regular expression for the {rule} rule")]
    InvalidRegex { rule: String, params: String },

    #[error("{params} is not a valid date expression for the {rule} rule")]
    InvalidExpression { rule: String, params: String },

    #[error("{message} is not a valid message for the {rule} rule")]
    InvalidMessage { rule: String, message: String },

    #[error("{0} is not a valid unit")]
    InvalidUnit(String),

    #[error("{0} reaches past the range of representable dates")]
    OffsetOutOfRange(String),

    #[error("model, model class, or models is required for {0} rule")]
    MissingCollection(String),

    #[error("rules are required for the {0} rule")]
    MissingRules(String),

    #[error("a rule named {0} is already registered")]
    DuplicateRule(String),
}

impl ConfigError {
    pub(crate) fn invalid_params(rule: &str, params: impl ToString) -> Self {
        ConfigError::InvalidParams {
            rule: rule.to_string(),
            params: params.to_string(),
        }
    }

    pub(crate) fn unknown_field(rule: &str, field: &str) -> Self {
        ConfigError::UnknownField {
            rule: rule.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn missing_params(rule: &str, expected: &'static str) -> Self {
        ConfigError::MissingParams {
            rule: rule.to_string(),
            expected,
        }
    }
}

/// Result alias used by the compile-time API.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Failure of a validation-gated save.
#[derive(Debug, Error)]
pub enum SaveError<E> {
    /// The record failed validation; the save was never attempted.
    #[error("record failed validation with {} message(s)", .0.messages.len())]
    Invalid(ValidationResult),

    /// The record passed validation but the save itself failed.
    #[error("save failed: {0}")]
    Save(E),
}

impl<E> SaveError<E> {
    /// The validation result that blocked the save, if that is what happened.
    pub fn validation(&self) -> Option<&ValidationResult> {
        match self {
            SaveError::Invalid(result) => Some(result),
            SaveError::Save(_) => None,
        }
    }
}
