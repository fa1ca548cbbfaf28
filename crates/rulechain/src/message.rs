//! Message templates, placeholder interpolation, and field aliases.

use crate::record::Record;
use crate::value::{display_value, TypeTag};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// An explicit message for a rule.
///
/// Sized and ranged rules pick their message by the runtime type of the value;
/// a [`Message::Text`] given to them applies to every type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Text(String),
    ByType(HashMap<TypeTag, String>),
}

impl Message {
    /// The template for a single-message rule.
    ///
    /// A typed map has no single template, so the string entry is used,
    /// falling back to any entry.
    pub fn text(&self) -> Option<&str> {
        match self {
            Message::Text(text) => Some(text),
            Message::ByType(map) => map
                .get(&TypeTag::String)
                .or_else(|| map.values().next())
                .map(String::as_str),
        }
    }

    /// Expand into a per-type map.
    pub fn by_type(&self) -> HashMap<TypeTag, String> {
        match self {
            Message::Text(text) => [TypeTag::String, TypeTag::Number, TypeTag::Object]
                .into_iter()
                .map(|tag| (tag, text.clone()))
                .collect(),
            Message::ByType(map) => map.clone(),
        }
    }

    /// Parse a message from configuration: a string or a map of type tag to
    /// string.
    pub fn from_value(value: &Value) -> Option<Message> {
        match value {
            Value::String(text) => Some(Message::Text(text.clone())),
            Value::Object(_) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

/// Display names for fields, used in messages.
#[derive(Debug, Clone, Default)]
pub struct Aliases(Arc<HashMap<String, String>>);

impl Aliases {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(Arc::new(map))
    }

    /// The alias for a field, or the field name itself.
    pub fn get<'a>(&'a self, field: &'a str) -> &'a str {
        self.0.get(field).map(String::as_str).unwrap_or(field)
    }
}

/// Join items for a message: `a`, `a and b`, `a, b, and c`.
///
/// When `aliases` is given each item is replaced by its alias first.
pub fn join_friendly(items: &[String], last_separator: &str, aliases: Option<&Aliases>) -> String {
    let mut copy: Vec<&str> = items
        .iter()
        .map(|item| match aliases {
            Some(aliases) => aliases.get(item),
            None => item.as_str(),
        })
        .collect();

    let Some(last) = copy.pop() else {
        return String::new();
    };

    match copy.len() {
        0 => last.to_string(),
        1 => format!("{} {} {}", copy[0], last_separator, last),
        _ => format!("{}, {} {}", copy.join(", "), last_separator, last),
    }
}

/// Replace `{name}` placeholders in a template.
///
/// `lookup` returns the replacement for a placeholder name; placeholders it
/// does not know are left untouched.
pub fn interpolate(template: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match lookup(key) {
                    Some(replacement) => result.push_str(&replacement),
                    None => {
                        result.push('{');
                        result.push_str(key);
                        result.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                result.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

/// Everything a compiled rule needs to turn a template into a message.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    field: String,
    alias: String,
    fields: Arc<[String]>,
}

impl MessageRenderer {
    pub fn new(field: &str, aliases: &Aliases, fields: Arc<[String]>) -> Self {
        Self {
            field: field.to_string(),
            alias: aliases.get(field).to_string(),
            fields,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Render a template with `{$field}`, `{$alias}`, `{$value}`, any record
    /// field, and the rule's extra placeholders.
    pub fn render(
        &self,
        template: &str,
        value: &Value,
        record: &dyn Record,
        extra: &[(&str, Value)],
    ) -> String {
        interpolate(template, |key| match key {
            "$field" => Some(self.field.clone()),
            "$alias" => Some(self.alias.clone()),
            "$value" => Some(display_value(value)),
            _ => {
                if let Some((_, v)) = extra.iter().find(|(name, _)| *name == key) {
                    Some(display_value(v))
                } else if self.fields.iter().any(|f| f == key) {
                    Some(display_value(&record.get(key)))
                } else {
                    None
                }
            }
        })
    }
}
