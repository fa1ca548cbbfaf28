//! Date expressions for the `after`/`before` family of rules.
//!
//! An expression string such as `today`, `+2days`, `2024-01-31`, or the name
//! of a sibling field is turned into an [`Expression`] once, at compile time,
//! and evaluated against the record on every run. Parsers are tried in
//! registration order and the first one that recognizes the string wins.

use crate::error::{ConfigError, Result};
use crate::record::{Record, Schema};
use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// A compiled expression producing a timestamp (milliseconds since the Unix
/// epoch) for the value under validation and its record.
pub type Expression = Arc<dyn Fn(&Value, &dyn Record) -> Option<i64> + Send + Sync>;

/// One way of reading an expression string.
pub trait ExpressionParser: Send + Sync {
    /// Name used for diagnostics.
    fn name(&self) -> &str;

    /// `Ok(None)` when the string is not this parser's syntax.
    fn parse(&self, expr: &str, schema: &Schema) -> Result<Option<Expression>>;
}

/// Ordered, append-only list of expression parsers.
#[derive(Clone, Default)]
pub struct ExpressionRegistry {
    parsers: Vec<Arc<dyn ExpressionParser>>,
}

impl ExpressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in parsers: date literal, field reference, relative offset,
    /// `today`, `tomorrow`, `yesterday`.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.push(DateLiteral);
        registry.push(FieldReference);
        registry.push(RelativeOffset);
        registry.push(DayKeyword::today());
        registry.push(DayKeyword::tomorrow());
        registry.push(DayKeyword::yesterday());
        registry
    }

    /// Append a parser; it runs after every parser already registered.
    pub fn push(&mut self, parser: impl ExpressionParser + 'static) {
        self.parsers.push(Arc::new(parser));
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    /// Parse with the first parser that recognizes `expr`; `Ok(None)` when
    /// none does.
    pub fn parse(&self, expr: &str, schema: &Schema) -> Result<Option<Expression>> {
        for parser in &self.parsers {
            if let Some(expression) = parser.parse(expr, schema)? {
                tracing::trace!(parser = parser.name(), expr, "expression parsed");
                return Ok(Some(expression));
            }
        }
        Ok(None)
    }
}

impl fmt::Debug for ExpressionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.parsers.iter().map(|p| p.name()))
            .finish()
    }
}

/// Parse a date value: a timestamp number, or a string in RFC 3339,
/// `YYYY-MM-DD HH:MM:SS`, or `YYYY-MM-DD` form (UTC).
///
/// Timestamps outside the representable calendar range are not dates.
pub fn parse_date(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))?,
        Value::String(s) => parse_date_str(s)?,
        _ => return None,
    };
    in_range(ms)
}

fn in_range(ms: i64) -> Option<i64> {
    DateTime::from_timestamp_millis(ms).map(|_| ms)
}

fn parse_date_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Truncate a timestamp to 00:00:00.000 of its UTC day.
pub fn start_of_day(ms: i64) -> Option<i64> {
    ms.checked_sub(ms.rem_euclid(MILLIS_PER_DAY))
}

/// Advance a timestamp to 23:59:59.999 of its UTC day.
pub fn end_of_day(ms: i64) -> Option<i64> {
    start_of_day(ms)?.checked_add(MILLIS_PER_DAY - 1)
}

/// A fixed date such as `2024-01-31`.
#[derive(Debug, Clone, Copy)]
pub struct DateLiteral;

impl ExpressionParser for DateLiteral {
    fn name(&self) -> &str {
        "date"
    }

    fn parse(&self, expr: &str, _schema: &Schema) -> Result<Option<Expression>> {
        Ok(parse_date_str(expr).map(|time| {
            let expression: Expression = Arc::new(move |_: &Value, _: &dyn Record| Some(time));
            expression
        }))
    }
}

/// The current value of a declared field.
#[derive(Debug, Clone, Copy)]
pub struct FieldReference;

impl ExpressionParser for FieldReference {
    fn name(&self) -> &str {
        "field"
    }

    fn parse(&self, expr: &str, schema: &Schema) -> Result<Option<Expression>> {
        if !schema.has_field(expr) {
            return Ok(None);
        }
        let field = expr.to_string();
        let expression: Expression =
            Arc::new(move |_: &Value, record: &dyn Record| parse_date(&record.get(&field)));
        Ok(Some(expression))
    }
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Millis(i64),
    Months(i64),
}

impl Unit {
    /// Scale by `amount`; `None` when no date can be that far from now.
    fn times(self, amount: f64) -> Option<Unit> {
        match self {
            Unit::Millis(ms) => {
                let offset = (ms as f64 * amount).trunc();
                (offset.abs() <= max_span_millis() as f64).then_some(Unit::Millis(offset as i64))
            }
            Unit::Months(months) => {
                let offset = (months as f64 * amount).trunc();
                (offset.abs() <= u32::MAX as f64).then_some(Unit::Months(offset as i64))
            }
        }
    }
}

fn max_span_millis() -> i64 {
    DateTime::<Utc>::MAX_UTC.timestamp_millis() - DateTime::<Utc>::MIN_UTC.timestamp_millis()
}

fn unit_scale(unit: &str) -> Option<Unit> {
    const SECOND: i64 = 1000;
    const MINUTE: i64 = 60 * SECOND;
    const HOUR: i64 = 60 * MINUTE;
    let scale = match unit {
        "ms" | "millisecond" | "milliseconds" => Unit::Millis(1),
        "s" | "second" | "seconds" => Unit::Millis(SECOND),
        "min" | "mins" | "minute" | "minutes" => Unit::Millis(MINUTE),
        "hr" | "hour" | "hours" => Unit::Millis(HOUR),
        "day" | "days" => Unit::Millis(MILLIS_PER_DAY),
        "wk" | "week" | "weeks" => Unit::Millis(7 * MILLIS_PER_DAY),
        "month" | "months" => Unit::Months(1),
        "yr" | "year" | "years" => Unit::Months(12),
        _ => return None,
    };
    Some(scale)
}

fn relative_regex() -> &'static Regex {
    static RELATIVE_REGEX: OnceLock<Regex> = OnceLock::new();
    RELATIVE_REGEX.get_or_init(|| {
        Regex::new(r"^([+-]\d+(?:\.\d+)?)\s*(.+)$").expect("relative expression regex is valid")
    })
}

fn shift_months(now: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let count = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        now.checked_add_months(count)
    } else {
        now.checked_sub_months(count)
    }
}

/// An offset from now such as `+2days`, `-1 week`, or `+6months`.
#[derive(Debug, Clone, Copy)]
pub struct RelativeOffset;

impl ExpressionParser for RelativeOffset {
    fn name(&self) -> &str {
        "relative"
    }

    fn parse(&self, expr: &str, _schema: &Schema) -> Result<Option<Expression>> {
        let Some(captures) = relative_regex().captures(expr) else {
            return Ok(None);
        };
        let amount: f64 = captures[1]
            .parse()
            .map_err(|_| ConfigError::InvalidUnit(expr.to_string()))?;
        let unit = captures[2].trim();
        let scale = unit_scale(unit).ok_or_else(|| ConfigError::InvalidUnit(unit.to_string()))?;
        let offset = scale
            .times(amount)
            .ok_or_else(|| ConfigError::OffsetOutOfRange(expr.to_string()))?;

        let expression: Expression = Arc::new(move |_: &Value, _: &dyn Record| {
            let now = Utc::now();
            match offset {
                Unit::Millis(ms) => now.timestamp_millis().checked_add(ms).and_then(in_range),
                Unit::Months(months) => shift_months(now, months).map(|d| d.timestamp_millis()),
            }
        });
        Ok(Some(expression))
    }
}

/// `today`, `tomorrow`, or `yesterday`, at the start of that UTC day.
#[derive(Debug, Clone, Copy)]
pub struct DayKeyword {
    keyword: &'static str,
    offset_days: i64,
}

impl DayKeyword {
    pub fn today() -> Self {
        Self {
            keyword: "today",
            offset_days: 0,
        }
    }

    pub fn tomorrow() -> Self {
        Self {
            keyword: "tomorrow",
            offset_days: 1,
        }
    }

    pub fn yesterday() -> Self {
        Self {
            keyword: "yesterday",
            offset_days: -1,
        }
    }
}

impl ExpressionParser for DayKeyword {
    fn name(&self) -> &str {
        self.keyword
    }

    fn parse(&self, expr: &str, _schema: &Schema) -> Result<Option<Expression>> {
        if expr != self.keyword {
            return Ok(None);
        }
        let offset = self.offset_days;
        let expression: Expression = Arc::new(move |_: &Value, _: &dyn Record| {
            let today = Utc::now().date_naive();
            let midnight = Utc.from_utc_datetime(&today.and_hms_opt(0, 0, 0)?);
            Some(midnight.timestamp_millis() + offset * MILLIS_PER_DAY)
        });
        Ok(Some(expression))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryRecord;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new("tasks", ["due_date", "created_at"])
    }

    fn eval(expr: &Expression) -> i64 {
        let record = MemoryRecord::from_value(json!({"created_at": "2024-03-01"}));
        expr(&Value::Null, &record).unwrap()
    }

    #[test]
    fn parses_date_values() {
        assert_eq!(parse_date(&json!("1970-01-02")), Some(MILLIS_PER_DAY));
        assert_eq!(parse_date(&json!("1970-01-01T00:00:01Z")), Some(1000));
        assert_eq!(parse_date(&json!("1970-01-01 00:01:00")), Some(60_000));
        assert_eq!(parse_date(&json!(1234)), Some(1234));
        assert_eq!(parse_date(&json!("not a date")), None);
        assert_eq!(parse_date(&json!(true)), None);
    }

    #[test]
    fn day_boundaries() {
        let noon = MILLIS_PER_DAY * 3 + MILLIS_PER_DAY / 2;
        assert_eq!(start_of_day(noon), Some(MILLIS_PER_DAY * 3));
        assert_eq!(end_of_day(noon), Some(MILLIS_PER_DAY * 4 - 1));
        assert_eq!(start_of_day(-1), Some(-MILLIS_PER_DAY));
        assert_eq!(start_of_day(i64::MIN), None);
        assert_eq!(end_of_day(i64::MAX), None);
    }

    #[test]
    fn huge_timestamps_are_not_dates() {
        assert_eq!(parse_date(&json!(1e300)), None);
        assert_eq!(parse_date(&json!(-1e300)), None);
        assert_eq!(parse_date(&json!(i64::MAX)), None);
        assert_eq!(parse_date(&json!(-86_400_000)), Some(-MILLIS_PER_DAY));
    }

    #[test]
    fn date_literal_wins_first() {
        let registry = ExpressionRegistry::standard();
        let expr = registry.parse("2024-01-31", &schema()).unwrap().unwrap();
        assert_eq!(Some(eval(&expr)), parse_date(&json!("2024-01-31")));
    }

    #[test]
    fn field_reference_reads_record() {
        let registry = ExpressionRegistry::standard();
        let expr = registry.parse("created_at", &schema()).unwrap().unwrap();
        assert_eq!(Some(eval(&expr)), parse_date(&json!("2024-03-01")));
    }

    #[test]
    fn keywords_are_day_aligned() {
        let registry = ExpressionRegistry::standard();
        let today = eval(&registry.parse("today", &schema()).unwrap().unwrap());
        let tomorrow = eval(&registry.parse("tomorrow", &schema()).unwrap().unwrap());
        let yesterday = eval(&registry.parse("yesterday", &schema()).unwrap().unwrap());

        assert_eq!(today % MILLIS_PER_DAY, 0);
        assert_eq!(tomorrow - today, MILLIS_PER_DAY);
        assert_eq!(today - yesterday, MILLIS_PER_DAY);
    }

    #[test]
    fn relative_offsets() {
        let registry = ExpressionRegistry::standard();
        let before = Utc::now().timestamp_millis();
        let expr = registry.parse("+2days", &schema()).unwrap().unwrap();
        let shifted = eval(&expr);
        assert!(shifted >= before + 2 * MILLIS_PER_DAY);
        assert!(shifted < before + 2 * MILLIS_PER_DAY + 60_000);

        let expr = registry.parse("-1 year", &schema()).unwrap().unwrap();
        assert!(eval(&expr) < before - 360 * MILLIS_PER_DAY);
    }

    #[test]
    fn relative_unknown_unit_is_config_error() {
        let registry = ExpressionRegistry::standard();
        let err = registry.parse("+2fortnights", &schema()).err().unwrap();
        assert_eq!(err, ConfigError::InvalidUnit("fortnights".to_string()));
    }

    #[test]
    fn unreachable_offsets_are_config_errors() {
        let registry = ExpressionRegistry::standard();
        for expr in ["+99999999999999999999days", "-5000000000months"] {
            let err = registry.parse(expr, &schema()).err().unwrap();
            assert_eq!(err, ConfigError::OffsetOutOfRange(expr.to_string()));
        }

        let expr = registry.parse("+100000years", &schema()).unwrap().unwrap();
        assert!(eval(&expr) > Utc::now().timestamp_millis());
    }

    #[test]
    fn unrecognized_expression_is_none() {
        let registry = ExpressionRegistry::standard();
        assert!(registry.parse("whenever", &schema()).unwrap().is_none());
        assert!(ExpressionRegistry::new().parse("today", &schema()).unwrap().is_none());
    }

    #[test]
    fn custom_parser_runs_after_builtins() {
        struct Epoch;
        impl ExpressionParser for Epoch {
            fn name(&self) -> &str {
                "epoch"
            }
            fn parse(&self, expr: &str, _schema: &Schema) -> Result<Option<Expression>> {
                Ok((expr == "epoch").then(|| Arc::new(|_: &Value, _: &dyn Record| Some(0i64)) as Expression))
            }
        }

        let mut registry = ExpressionRegistry::standard();
        registry.push(Epoch);
        assert_eq!(registry.len(), 7);
        let expr = registry.parse("epoch", &schema()).unwrap().unwrap();
        assert_eq!(eval(&expr), 0);
    }
}
