//! Rule parameters and the small splitting grammar of the rule DSL.
//!
//! A rule receives its parameters either from the suffix of its token
//! (`between:3,10`) or from the `input` of a map-form entry. Both end up as a
//! [`RuleParams`]; each shape then normalizes the string, array, and object
//! forms into the values it needs.

use crate::expression::Expression;
use crate::record::Record;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Separates rule tokens in a string specification.
pub const RULE_DELIMITER: char = '|';
/// Separates a rule name from its parameters.
pub const RULE_SEPARATOR: char = ':';
/// Separates list items inside parameters.
pub const LIST_DELIMITER: char = ',';
/// Placed before a delimiter to make it literal.
pub const ESCAPE: char = '\\';

/// Custom equality used by the item-match rules.
pub type Equality = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Parameters handed to a rule factory.
#[derive(Clone, Default)]
pub enum RuleParams {
    #[default]
    None,
    /// Raw parameter text, e.g. the `3,10` of `between:3,10`.
    Text(String),
    /// Structured input from configuration.
    Value(Value),
    /// An explicit foreign collection for `exists`/`unique`.
    Records {
        model: Option<String>,
        field: Option<String>,
        records: Vec<Arc<dyn Record>>,
    },
    /// Item-match input for `contains`/`not_contains` with optional equality.
    Match {
        field: String,
        value: Value,
        equality: Option<Equality>,
    },
    /// A prebuilt date expression for the date rules.
    Expression(Expression),
}

impl RuleParams {
    /// Map configuration input: null is no input, a string is raw text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => RuleParams::None,
            Value::String(text) => RuleParams::Text(text),
            other => RuleParams::Value(other),
        }
    }

    /// Whether nothing was supplied.
    pub fn is_none(&self) -> bool {
        match self {
            RuleParams::None => true,
            RuleParams::Text(text) => text.is_empty(),
            RuleParams::Value(value) => value.is_null(),
            _ => false,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            RuleParams::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            RuleParams::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Field names from `a, b` text or an array of strings.
    pub fn field_list(&self) -> Option<Vec<String>> {
        match self {
            RuleParams::Text(text) => Some(split_list(text, true)),
            RuleParams::Value(Value::Array(items)) => {
                items.iter().map(|item| item.as_str().map(String::from)).collect()
            }
            _ => None,
        }
    }

    /// The value form used in messages (`{$params}`, `{$number}`, ...).
    pub fn display(&self) -> Value {
        match self {
            RuleParams::None => Value::Null,
            RuleParams::Text(text) => Value::String(text.clone()),
            RuleParams::Value(value) => value.clone(),
            RuleParams::Records { model, .. } => {
                model.clone().map(Value::String).unwrap_or(Value::Null)
            }
            RuleParams::Match { field, value, .. } => {
                Value::String(format!("{},{}", field, crate::value::display_value(value)))
            }
            RuleParams::Expression(_) => Value::String("<expression>".to_string()),
        }
    }

    /// Text used when reporting the parameters in a configuration error.
    pub(crate) fn describe(&self) -> String {
        crate::value::display_value(&self.display())
    }
}

impl fmt::Debug for RuleParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleParams::None => f.write_str("None"),
            RuleParams::Text(text) => f.debug_tuple("Text").field(text).finish(),
            RuleParams::Value(value) => f.debug_tuple("Value").field(value).finish(),
            RuleParams::Records {
                model,
                field,
                records,
            } => f
                .debug_struct("Records")
                .field("model", model)
                .field("field", field)
                .field("records", &records.len())
                .finish(),
            RuleParams::Match {
                field,
                value,
                equality,
            } => f
                .debug_struct("Match")
                .field("field", field)
                .field("value", value)
                .field("custom_equality", &equality.is_some())
                .finish(),
            RuleParams::Expression(_) => f.write_str("Expression"),
        }
    }
}

impl From<&str> for RuleParams {
    fn from(text: &str) -> Self {
        RuleParams::Text(text.to_string())
    }
}

impl From<String> for RuleParams {
    fn from(text: String) -> Self {
        RuleParams::Text(text)
    }
}

impl From<Value> for RuleParams {
    fn from(value: Value) -> Self {
        RuleParams::from_value(value)
    }
}

impl From<Expression> for RuleParams {
    fn from(expression: Expression) -> Self {
        RuleParams::Expression(expression)
    }
}

/// Split on `delimiter` unless it is preceded by [`ESCAPE`].
///
/// Escapes are kept in the output so a token can be split again at a deeper
/// level without losing them.
pub fn split_escaped(input: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ESCAPE && chars.peek() == Some(&delimiter) {
            current.push(c);
            current.push(delimiter);
            chars.next();
        } else if c == delimiter {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }

    parts.push(current);
    parts
}

/// Split a parameter list on commas, dropping the escape before a literal
/// comma. With `trim`, whitespace around each item is removed.
pub fn split_list(input: &str, trim: bool) -> Vec<String> {
    let escaped = format!("{}{}", ESCAPE, LIST_DELIMITER);
    split_escaped(input, LIST_DELIMITER)
        .into_iter()
        .map(|item| {
            let item = item.replace(&escaped, ",");
            if trim {
                item.trim().to_string()
            } else {
                item
            }
        })
        .collect()
}

fn float_prefix_regex() -> &'static Regex {
    static FLOAT_PREFIX: OnceLock<Regex> = OnceLock::new();
    FLOAT_PREFIX.get_or_init(|| {
        Regex::new(r"^\s*[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("float regex is valid")
    })
}

/// Leading-number parse: `"3.5kg"` gives 3.5, numbers pass through, anything
/// without a numeric prefix gives `None`.
pub fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_str(s),
        _ => None,
    }
}

pub(crate) fn parse_float_str(s: &str) -> Option<f64> {
    let matched = float_prefix_regex().find(s)?;
    matched
        .as_str()
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}
