use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::types::ExportConfig;

use super::types::ColumnType;
use super::value::{ExportValue, DATETIME_FORMAT};

const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Text written for boolean columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanLabels {
    pub true_label: String,
    pub false_label: String,
}

impl Default for BooleanLabels {
    fn default() -> Self {
        Self {
            true_label: "Yes".to_string(),
            false_label: "No".to_string(),
        }
    }
}

/// Turns extracted values into cell text according to the column type.
/// Formatting never fails; values that do not fit their column's rule fall
/// back to their generic string form.
#[derive(Debug, Clone, Default)]
pub struct ValueFormatter {
    labels: BooleanLabels,
}

impl ValueFormatter {
    pub fn new(labels: BooleanLabels) -> Self {
        Self { labels }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(BooleanLabels {
            true_label: config.boolean_true_label.clone(),
            false_label: config.boolean_false_label.clone(),
        })
    }

    pub fn labels(&self) -> &BooleanLabels {
        &self.labels
    }

    pub fn format(&self, value: &ExportValue, column_type: &ColumnType) -> String {
        if value.is_null() {
            return String::new();
        }

        match column_type {
            ColumnType::DateTime => as_datetime(value)
                .map(|dt| dt.format(DATETIME_FORMAT).to_string())
                .unwrap_or_else(|| stringify(value)),
            ColumnType::Boolean => {
                if is_truthy(value) {
                    self.labels.true_label.clone()
                } else {
                    self.labels.false_label.clone()
                }
            }
            ColumnType::Number => as_numeric(value)
                .map(format_number)
                .unwrap_or_else(|| stringify(value)),
            ColumnType::String | ColumnType::Enum | ColumnType::Other(_) => stringify(value),
        }
    }
}

/// Generic string form of any value.
pub fn stringify(value: &ExportValue) -> String {
    match value {
        ExportValue::Null => String::new(),
        ExportValue::Bool(b) => b.to_string(),
        ExportValue::Int(i) => i.to_string(),
        ExportValue::Float(f) => f.to_string(),
        ExportValue::Decimal(d) => d.to_string(),
        ExportValue::Text(s) => s.clone(),
        ExportValue::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        ExportValue::Enum { value, label } => label.clone().unwrap_or_else(|| value.clone()),
        ExportValue::List(_) | ExportValue::Map(_) => serde_json::to_string(value).unwrap_or_default(),
        ExportValue::Object(record) => record.display().unwrap_or_default(),
    }
}

/// Parses the date/time text shapes stores commonly produce.
pub fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for pattern in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

fn as_datetime(value: &ExportValue) -> Option<NaiveDateTime> {
    match value {
        ExportValue::DateTime(dt) => Some(*dt),
        ExportValue::Text(text) => parse_datetime_text(text),
        _ => None,
    }
}

fn is_truthy(value: &ExportValue) -> bool {
    match value {
        ExportValue::Null => false,
        ExportValue::Bool(b) => *b,
        ExportValue::Int(i) => *i != 0,
        ExportValue::Float(f) => *f != 0.0,
        ExportValue::Decimal(d) => !d.is_zero(),
        ExportValue::Text(s) => !(s.is_empty() || s == "0"),
        ExportValue::List(items) => !items.is_empty(),
        ExportValue::Map(entries) => !entries.is_empty(),
        ExportValue::DateTime(_) | ExportValue::Enum { .. } | ExportValue::Object(_) => true,
    }
}

/// A numeric cell value. Magnitudes beyond what `Decimal` holds stay `f64`.
enum Numeric {
    Exact(Decimal),
    Approx(f64),
}

impl Numeric {
    fn from_f64(value: f64) -> Self {
        Decimal::from_f64(value).map_or(Numeric::Approx(value), Numeric::Exact)
    }
}

fn as_numeric(value: &ExportValue) -> Option<Numeric> {
    match value {
        ExportValue::Int(i) => Some(Numeric::Exact(Decimal::from(*i))),
        ExportValue::Float(f) if f.is_finite() => Some(Numeric::from_f64(*f)),
        ExportValue::Decimal(d) => Some(Numeric::Exact(*d)),
        ExportValue::Text(s) => parse_numeric_text(s),
        _ => None,
    }
}

fn parse_numeric_text(text: &str) -> Option<Numeric> {
    let text = text.trim();
    let numeric_chars = text.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if text.is_empty() || !numeric_chars || !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Ok(d) = Decimal::from_str(text) {
        return Some(Numeric::Exact(d));
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Numeric::from_f64)
}

/// Two decimals, half away from zero, `,` thousands separator.
fn format_number(value: Numeric) -> String {
    match value {
        Numeric::Exact(d) => {
            let mut rounded = d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            rounded.rescale(2);
            let negative = rounded.is_sign_negative() && !rounded.is_zero();
            group_thousands(negative, &rounded.abs().to_string())
        }
        Numeric::Approx(f) => group_thousands(f < 0.0, &format!("{:.2}", f.abs())),
    }
}

fn group_thousands(negative: bool, digits: &str) -> String {
    let (integer, fraction) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    format!("{}{}.{}", if negative { "-" } else { "" }, grouped, fraction)
}
