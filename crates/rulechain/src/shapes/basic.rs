//! Plain predicates and regular-expression predicates.

use crate::chain::{ChainControl, CompiledValidator};
use crate::error::{ConfigError, Result};
use crate::expression::parse_date;
use crate::message::MessageRenderer;
use crate::params::{parse_float, RuleParams};
use crate::record::Record;
use crate::registry::{RuleContext, RuleFactory, RuleRegistry};
use crate::value::{display_value, is_empty, number};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Decision of a plain predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid,
    /// Valid, and later rules should see this value instead.
    Rewrite(Value),
    Invalid,
}

type Check = Arc<dyn Fn(&Value) -> Verdict + Send + Sync>;

/// Shape for rules that take no parameters and decide from the value alone.
#[derive(Clone)]
pub struct PredicateRule {
    message: &'static str,
    check: Check,
}

impl PredicateRule {
    pub fn new(message: &'static str, check: impl Fn(&Value) -> Verdict + Send + Sync + 'static) -> Self {
        Self {
            message,
            check: Arc::new(check),
        }
    }

    /// A predicate that never rewrites the value.
    pub fn invalid_when(message: &'static str, is_invalid: fn(&Value) -> bool) -> Self {
        Self::new(message, move |value| {
            if is_invalid(value) {
                Verdict::Invalid
            } else {
                Verdict::Valid
            }
        })
    }
}

impl RuleFactory for PredicateRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        ctx.expect_no_params()?;
        Ok(Arc::new(PredicateValidator {
            rule: ctx.rule.to_string(),
            check: self.check.clone(),
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
        }))
    }
}

struct PredicateValidator {
    rule: String,
    check: Check,
    template: String,
    renderer: MessageRenderer,
}

#[async_trait]
impl CompiledValidator for PredicateValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        match (self.check)(&value) {
            Verdict::Valid => chain.next(),
            Verdict::Rewrite(rewritten) => chain.update(rewritten).next(),
            Verdict::Invalid => {
                chain.invalid(self.renderer.render(&self.template, &value, record, &[]))
            }
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

/// Shape for rules that match the value's text against a regular expression.
#[derive(Clone)]
pub struct RegexRule {
    message: &'static str,
    regex: Regex,
}

impl RegexRule {
    pub fn new(message: &'static str, regex: Regex) -> Self {
        Self { message, regex }
    }
}

impl RuleFactory for RegexRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        ctx.expect_no_params()?;
        Ok(Arc::new(RegexValidator {
            rule: ctx.rule.to_string(),
            regex: self.regex.clone(),
            template: ctx.template(self.message),
            renderer: ctx.renderer(),
        }))
    }
}

/// `regex:/pattern/flags`; flags `i` and `m` are honored, `g` is accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternRule;

const PATTERN_MESSAGE: &str = "{$alias} is not a valid value.";

fn pattern_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^/(.*)/([gmi]*)$").expect("pattern regex is valid"))
}

impl RuleFactory for PatternRule {
    fn compile(&self, ctx: &RuleContext<'_>) -> Result<Arc<dyn CompiledValidator>> {
        let invalid = || ConfigError::InvalidRegex {
            rule: ctx.rule.to_string(),
            params: ctx.params.describe(),
        };

        let source = match &ctx.params {
            RuleParams::Text(text) => text.as_str(),
            RuleParams::Value(Value::String(text)) => text.as_str(),
            _ => return Err(invalid()),
        };
        let captures = pattern_regex().captures(source).ok_or_else(invalid)?;
        let flags = &captures[2];
        let regex = RegexBuilder::new(&captures[1])
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .build()
            .map_err(|_| invalid())?;

        Ok(Arc::new(RegexValidator {
            rule: ctx.rule.to_string(),
            regex,
            template: ctx.template(PATTERN_MESSAGE),
            renderer: ctx.renderer(),
        }))
    }
}

struct RegexValidator {
    rule: String,
    regex: Regex,
    template: String,
    renderer: MessageRenderer,
}

#[async_trait]
impl CompiledValidator for RegexValidator {
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        if self.regex.is_match(&display_value(&value)) {
            chain.next();
        } else {
            chain.invalid(self.renderer.render(&self.template, &value, record, &[]));
        }
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}

fn accepted(value: &Value) -> bool {
    matches!(
        display_value(value).to_lowercase().as_str(),
        "1" | "yes" | "on" | "y" | "true"
    )
}

fn yes_no(value: &Value) -> Option<bool> {
    match display_value(value).as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn whole(value: &Value) -> Verdict {
    match parse_float(value) {
        Some(parsed) if parsed.fract() == 0.0 => Verdict::Rewrite(number(parsed)),
        _ => Verdict::Invalid,
    }
}

fn numeric(value: &Value) -> Verdict {
    match parse_float(value) {
        Some(parsed) => Verdict::Rewrite(number(parsed)),
        None => Verdict::Invalid,
    }
}

fn date_like(value: &Value) -> Verdict {
    match parse_date(value) {
        Some(time) => Verdict::Rewrite(Value::from(time)),
        None => Verdict::Invalid,
    }
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> Regex {
            static REGEX: OnceLock<Regex> = OnceLock::new();
            REGEX
                .get_or_init(|| Regex::new($pattern).expect("built-in regex is valid"))
                .clone()
        }
    };
}

static_regex!(alpha_regex, r"^[a-zA-Z]*$");
static_regex!(alpha_dash_regex, r"^[a-zA-Z0-9_-]*$");
static_regex!(alpha_num_regex, r"^[a-zA-Z0-9]*$");
static_regex!(email_regex, r"^.+@.+\..+$");
static_regex!(
    url_regex,
    r"^(https?://)?[-a-zA-Z0-9@:%._+~#=]{2,256}\.[a-z]{2,6}\b([-a-zA-Z0-9@:%_+.~#?&/=]*)$"
);
static_regex!(
    uri_regex,
    r"^(\w+://)?[-a-zA-Z0-9@:%._+~#=]{2,256}\.[a-z]{2,6}\b([-a-zA-Z0-9@:%_+.~#?&/=]*)$"
);
static_regex!(
    phone_regex,
    r"^1?\W*([2-9][0-8][0-9])\W*([2-9][0-9]{2})\W*([0-9]{4})(\se?x?t?(\d*))?$"
);

pub(crate) fn register(registry: &mut RuleRegistry) {
    registry.insert(
        "required",
        PredicateRule::invalid_when("{$alias} is required.", is_empty),
    );
    registry.insert(
        "accepted",
        PredicateRule::invalid_when("{$alias} has not been accepted.", |v| !accepted(v)),
    );
    registry.insert(
        "array",
        PredicateRule::invalid_when("{$alias} must be an array.", |v| !v.is_array()),
    );
    registry.insert(
        "object",
        PredicateRule::invalid_when("{$alias} must be an object.", |v| !v.is_object()),
    );
    registry.insert(
        "string",
        PredicateRule::invalid_when("{$alias} must be a string.", |v| !v.is_string()),
    );
    registry.insert(
        "number",
        PredicateRule::invalid_when("{$alias} must be a number.", |v| !v.is_number()),
    );
    registry.insert(
        "boolean",
        PredicateRule::invalid_when("{$alias} must be a true or false.", |v| !v.is_boolean()),
    );
    registry.insert("whole", PredicateRule::new("{$alias} must be a whole number.", whole));
    registry.insert("numeric", PredicateRule::new("{$alias} must be numeric.", numeric));
    registry.insert(
        "yesno",
        PredicateRule::new("{$alias} must be a yes or no.", |v| match yes_no(v) {
            Some(flag) => Verdict::Rewrite(Value::Bool(flag)),
            None => Verdict::Invalid,
        }),
    );
    registry.insert(
        "date_like",
        PredicateRule::new("{$alias} must be a valid date.", date_like),
    );

    registry.insert(
        "alpha",
        RegexRule::new("{$alias} should only contain alphabetic characters.", alpha_regex()),
    );
    registry.insert(
        "alpha_dash",
        RegexRule::new(
            "{$alias} should only contain alpha-numeric characters, dashes, and underscores.",
            alpha_dash_regex(),
        ),
    );
    registry.insert(
        "alpha_num",
        RegexRule::new(
            "{$alias} should only contain alpha-numeric characters.",
            alpha_num_regex(),
        ),
    );
    registry.insert("email", RegexRule::new("{$alias} is not a valid email.", email_regex()));
    registry.insert("url", RegexRule::new("{$alias} is not a valid URL.", url_regex()));
    registry.insert("uri", RegexRule::new("{$alias} is not a valid URI.", uri_regex()));
    registry.insert(
        "phone",
        RegexRule::new("{$alias} is not a valid phone number.", phone_regex()),
    );
    registry.insert("regex", PatternRule);
}
