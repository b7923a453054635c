//! Human-readable rendering of submitted values, shared by the PDF and email outputs.

use serde_json::Value;

use super::schema::{FieldType, FormSchema};
use super::submissions::SubmissionData;
use super::validation::parse_date;

/// Label/value pairs for every non-empty submitted field, in schema order.
pub fn display_rows(schema: &FormSchema, data: &SubmissionData) -> Vec<(String, String)> {
    schema
        .fields
        .iter()
        .filter_map(|field| {
            let value = data.get(&field.key)?;
            if matches!(value, Value::Null) || value.as_str() == Some("") {
                return None;
            }
            Some((field.label.clone(), format_value(field.field_type, value)))
        })
        .collect()
}

/// Checkbox lists are comma-joined, dates printed day-first, structured values as
/// indented JSON. Newlines are preserved for the caller to turn into line breaks.
pub fn format_value(field_type: FieldType, value: &Value) -> String {
    match (field_type, value) {
        (FieldType::Checkbox, Value::Array(items)) => items
            .iter()
            .map(plain_text)
            .collect::<Vec<_>>()
            .join(", "),
        (FieldType::Date, Value::String(raw)) => parse_date(raw)
            .map(|date| date.format("%d/%m/%Y").to_string())
            .unwrap_or_else(|| raw.clone()),
        (_, Value::Array(_) | Value::Object(_)) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        (_, other) => plain_text(other),
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
