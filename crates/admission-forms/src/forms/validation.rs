use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::intake::FileMap;
use super::schema::{FieldType, FormFieldDef, ValidationRules};
use super::submissions::SubmissionData;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<FieldError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn error_for(&self, field: &str) -> Option<&FieldError> {
        self.errors.iter().find(|error| error.field == field)
    }
}

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
}

type PatternCache = RwLock<HashMap<String, Option<Regex>>>;

fn pattern_cache() -> &'static PatternCache {
    static PATTERNS: OnceLock<PatternCache> = OnceLock::new();
    PATTERNS.get_or_init(PatternCache::default)
}

/// Field patterns compile once per process; an uncompilable pattern is remembered as `None`.
fn compiled(pattern: &str) -> Option<Regex> {
    if let Some(cached) = pattern_cache().read().get(pattern) {
        return cached.clone();
    }
    let regex = match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::warn!(pattern, error = %err, "skipping uncompilable field pattern");
            None
        }
    };
    pattern_cache()
        .write()
        .entry(pattern.to_string())
        .or_insert(regex)
        .clone()
}

/// Checks `data` and `files` against the public fields of a schema and collects every
/// failure. Admin-only fields are not considered.
pub fn validate_submission(
    fields: &[FormFieldDef],
    data: &SubmissionData,
    files: &FileMap,
) -> ValidationResult {
    let mut errors = Vec::new();

    for field in fields.iter().filter(|field| field.is_public()) {
        let value = data.get(&field.key);
        let mut push = |message: String| {
            errors.push(FieldError {
                field: field.key.clone(),
                message,
            })
        };

        if field.field_type == FieldType::File {
            if field.required && files.for_field(&field.key).is_empty() {
                push(format!("{} is required", field.label));
            }
            continue;
        }

        let blank = match value {
            Some(value) => is_blank(field.field_type, value),
            None => true,
        };
        if blank {
            if field.required {
                push(format!("{} is required", field.label));
            }
            continue;
        }
        let Some(value) = value else { continue };

        if let Some(message) = check_value(field, value) {
            push(message);
        }
    }

    ValidationResult::from_errors(errors)
}

fn is_blank(field_type: FieldType, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Bool(false) => field_type == FieldType::Checkbox,
        _ => false,
    }
}

fn check_value(field: &FormFieldDef, value: &Value) -> Option<String> {
    let label = &field.label;
    let rules = field.validation.as_ref();

    match field.field_type {
        FieldType::Email => {
            let valid = value
                .as_str()
                .zip(email_pattern())
                .map(|(text, pattern)| pattern.is_match(text))
                .unwrap_or(false);
            (!valid).then(|| format!("{label} must be a valid email address"))
        }
        FieldType::Number => {
            let Some(number) = as_number(value) else {
                return Some(format!("{label} must be a number"));
            };
            let rules = rules?;
            if let Some(min) = rules.min.filter(|min| number < *min) {
                return Some(format!("{label} must be at least {}", display_number(min)));
            }
            if let Some(max) = rules.max.filter(|max| number > *max) {
                return Some(format!("{label} must be at most {}", display_number(max)));
            }
            None
        }
        FieldType::Select | FieldType::Radio => {
            if field.options.is_empty() {
                return None;
            }
            let Some(submitted) = scalar_text(value) else {
                return Some(format!("{label} has an invalid option"));
            };
            let matched = field
                .options
                .iter()
                .any(|option| option.to_lowercase() == submitted.to_lowercase());
            (!matched).then(|| format!("{label} has an invalid option"))
        }
        FieldType::Checkbox => match value {
            Value::Bool(_) | Value::Array(_) => None,
            _ => Some(format!("{label} must be a checkbox value")),
        },
        FieldType::Date => {
            let valid = value.as_str().and_then(parse_date).is_some();
            (!valid).then(|| format!("{label} must be a valid date"))
        }
        FieldType::Text | FieldType::Textarea => {
            let Some(text) = scalar_text(value) else {
                return Some(format_message(label, rules));
            };
            check_text(label, &text, rules?)
        }
        FieldType::File => None,
    }
}

fn check_text(label: &str, text: &str, rules: &ValidationRules) -> Option<String> {
    let length = text.chars().count();
    if let Some(min) = rules.min_length.filter(|min| length < *min) {
        return Some(format!("{label} must be at least {min} characters"));
    }
    if let Some(max) = rules.max_length.filter(|max| length > *max) {
        return Some(format!("{label} must be at most {max} characters"));
    }
    for pattern in rules.patterns() {
        let matched = compiled(pattern).map_or(true, |regex| regex.is_match(text));
        if !matched {
            return Some(format_message(label, Some(rules)));
        }
    }
    None
}

fn format_message(label: &str, rules: Option<&ValidationRules>) -> String {
    rules
        .and_then(|rules| rules.message.clone())
        .unwrap_or_else(|| format!("{label} format is invalid"))
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn display_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps, and `YYYY-MM-DDTHH:MM[:SS]`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|timestamp| timestamp.date())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::intake::FileUpload;
    use bytes::Bytes;
    use serde_json::json;

    fn fields(definitions: Value) -> Vec<FormFieldDef> {
        serde_json::from_value(definitions).expect("fields parse")
    }

    fn data(value: Value) -> SubmissionData {
        value.as_object().cloned().expect("object")
    }

    fn messages(result: &ValidationResult) -> Vec<&str> {
        result.errors.iter().map(|error| error.message.as_str()).collect()
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let fields = fields(json!([
            {"key": "fullNameEnglish", "label": "Full Name (English)", "type": "text", "required": true},
            {"key": "city", "label": "City", "type": "text"}
        ]));
        let result = validate_submission(&fields, &data(json!({"city": ""})), &FileMap::default());

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "fullNameEnglish");
        assert_eq!(result.errors[0].message, "Full Name (English) is required");
    }

    #[test]
    fn required_file_needs_an_upload() {
        let fields = fields(json!([
            {"key": "studentPhoto", "label": "Student Photo", "type": "file", "required": true}
        ]));
        let empty = validate_submission(&fields, &data(json!({})), &FileMap::default());
        assert_eq!(messages(&empty), vec!["Student Photo is required"]);

        let files: FileMap = [FileUpload::new(
            "studentPhoto",
            "me.jpg",
            None,
            Bytes::from_static(b"jpg"),
        )]
        .into_iter()
        .collect();
        assert!(validate_submission(&fields, &data(json!({})), &files).valid);
    }

    #[test]
    fn admin_only_fields_are_ignored() {
        let fields = fields(json!([
            {"key": "reviewNotes", "label": "Review Notes", "type": "text", "required": true, "visibility": "admin-only"}
        ]));
        assert!(validate_submission(&fields, &data(json!({})), &FileMap::default()).valid);
    }

    #[test]
    fn email_format_is_checked() {
        let fields = fields(json!([{"key": "email", "label": "Email", "type": "email"}]));
        let bad = validate_submission(&fields, &data(json!({"email": "not-an-email"})), &FileMap::default());
        assert_eq!(messages(&bad), vec!["Email must be a valid email address"]);

        let good = validate_submission(&fields, &data(json!({"email": "a@b.pk"})), &FileMap::default());
        assert!(good.valid);
    }

    #[test]
    fn numbers_parse_and_respect_bounds() {
        let fields = fields(json!([
            {"key": "yearCompleted", "label": "Year Completed", "type": "number",
             "validation": {"min": 1990, "max": 2025}}
        ]));
        let check = |value: Value| {
            validate_submission(&fields, &data(json!({"yearCompleted": value})), &FileMap::default())
        };

        assert!(check(json!("2020")).valid);
        assert!(check(json!(2001)).valid);
        assert_eq!(messages(&check(json!("twenty"))), vec!["Year Completed must be a number"]);
        assert_eq!(messages(&check(json!(1980))), vec!["Year Completed must be at least 1990"]);
        assert_eq!(messages(&check(json!("2030"))), vec!["Year Completed must be at most 2025"]);
    }

    #[test]
    fn select_matches_options_case_insensitively_for_every_shape() {
        for options in [
            json!(["Male", "Female"]),
            json!([{"value": "Male", "label": "Male"}, {"value": "Female", "label": "Female"}]),
            json!({"values": ["Male", "Female"]}),
        ] {
            let fields = fields(json!([
                {"key": "gender", "label": "Gender", "type": "select", "options": options}
            ]));
            let accepted = validate_submission(&fields, &data(json!({"gender": "female"})), &FileMap::default());
            assert!(accepted.valid, "options {options} should accept 'female'");

            let rejected = validate_submission(&fields, &data(json!({"gender": "other"})), &FileMap::default());
            assert_eq!(messages(&rejected), vec!["Gender has an invalid option"]);
        }
    }

    #[test]
    fn radio_uses_the_same_option_rules() {
        let fields = fields(json!([
            {"key": "hostelRequired", "label": "Hostel Required", "type": "radio", "options": ["Yes", "No"]}
        ]));
        assert!(validate_submission(&fields, &data(json!({"hostelRequired": "YES"})), &FileMap::default()).valid);
    }

    #[test]
    fn checkbox_accepts_bool_or_list_and_required_means_ticked() {
        let fields = fields(json!([
            {"key": "declarationAgreement", "label": "Declaration Agreement", "type": "checkbox", "required": true}
        ]));
        let check = |value: Value| {
            validate_submission(&fields, &data(json!({"declarationAgreement": value})), &FileMap::default())
        };

        assert!(check(json!(true)).valid);
        assert!(check(json!(["agree"])).valid);
        assert_eq!(messages(&check(json!(false))), vec!["Declaration Agreement is required"]);
        assert_eq!(messages(&check(json!("yes"))), vec!["Declaration Agreement must be a checkbox value"]);
    }

    #[test]
    fn dates_must_be_real_calendar_dates() {
        let fields = fields(json!([{"key": "dateOfBirth", "label": "Date of Birth", "type": "date"}]));
        let check = |value: Value| {
            validate_submission(&fields, &data(json!({"dateOfBirth": value})), &FileMap::default())
        };

        assert!(check(json!("2010-02-28")).valid);
        assert!(check(json!("2010-02-28T00:00:00Z")).valid);
        assert_eq!(messages(&check(json!("2010-02-30"))), vec!["Date of Birth must be a valid date"]);
        assert_eq!(messages(&check(json!("yesterday"))), vec!["Date of Birth must be a valid date"]);
    }

    #[test]
    fn text_lengths_and_patterns_are_enforced() {
        let fields = fields(json!([
            {"key": "cnicBForm", "label": "CNIC / B-Form Number", "type": "text",
             "validation": {
                "pattern": "^[0-9]{5}-[0-9]{7}-[0-9]{1}$|^[0-9]{13}$",
                "message": "Please enter a valid CNIC (XXXXX-XXXXXXX-X) or B-Form number"
             }},
            {"key": "whyJoin", "label": "Why Join", "type": "textarea",
             "validation": {"minLength": 10, "maxLength": 20}},
            {"key": "code", "label": "Code", "type": "text", "validation": {"regex": "^[A-Z]+$"}}
        ]));

        let ok = validate_submission(
            &fields,
            &data(json!({"cnicBForm": "3520212345671", "whyJoin": "to learn more", "code": "ABC"})),
            &FileMap::default(),
        );
        assert!(ok.valid, "{:?}", ok.errors);

        let bad = validate_submission(
            &fields,
            &data(json!({"cnicBForm": "abc", "whyJoin": "short", "code": "abc"})),
            &FileMap::default(),
        );
        assert_eq!(
            messages(&bad),
            vec![
                "Please enter a valid CNIC (XXXXX-XXXXXXX-X) or B-Form number",
                "Why Join must be at least 10 characters",
                "Code format is invalid",
            ]
        );
    }

    #[test]
    fn lists_and_objects_never_satisfy_an_option_field() {
        let fields = fields(json!([
            {"key": "gender", "label": "Gender", "type": "select", "options": ["Male", "Female"]},
            {"key": "hostelRequired", "label": "Hostel Required", "type": "radio", "options": ["Yes", "No"]}
        ]));
        for (gender, hostel) in [
            (json!(["Alien"]), json!(["Maybe"])),
            (json!(["Male"]), json!(["Yes"])),
            (json!({"value": "Male"}), json!({"choice": "No"})),
        ] {
            let result = validate_submission(
                &fields,
                &data(json!({"gender": gender, "hostelRequired": hostel})),
                &FileMap::default(),
            );
            assert_eq!(
                messages(&result),
                vec!["Gender has an invalid option", "Hostel Required has an invalid option"]
            );
        }
    }

    #[test]
    fn lists_and_objects_never_satisfy_a_text_field() {
        let fields = fields(json!([
            {"key": "cnicBForm", "label": "CNIC / B-Form Number", "type": "text",
             "validation": {
                "pattern": "^[0-9]{13}$",
                "message": "Please enter a valid CNIC (XXXXX-XXXXXXX-X) or B-Form number"
             }},
            {"key": "city", "label": "City", "type": "text"},
            {"key": "whyJoin", "label": "Why Join", "type": "textarea", "validation": {"maxLength": 5}}
        ]));
        let result = validate_submission(
            &fields,
            &data(json!({
                "cnicBForm": ["abc"],
                "city": {"name": "Lahore"},
                "whyJoin": ["a", "much", "longer", "answer"]
            })),
            &FileMap::default(),
        );
        assert_eq!(
            messages(&result),
            vec![
                "Please enter a valid CNIC (XXXXX-XXXXXXX-X) or B-Form number",
                "City format is invalid",
                "Why Join format is invalid",
            ]
        );
    }

    #[test]
    fn field_patterns_compile_once_and_keep_matching() {
        let fields = fields(json!([
            {"key": "rollNumber", "label": "Roll Number", "type": "text",
             "validation": {"pattern": "^RN-[0-9]{4}$"}}
        ]));
        for _ in 0..3 {
            let ok = validate_submission(&fields, &data(json!({"rollNumber": "RN-0042"})), &FileMap::default());
            assert!(ok.valid);
            let bad = validate_submission(&fields, &data(json!({"rollNumber": "42"})), &FileMap::default());
            assert_eq!(messages(&bad), vec!["Roll Number format is invalid"]);
        }

        let cached = pattern_cache().read().get("^RN-[0-9]{4}$").cloned();
        assert!(matches!(cached, Some(Some(_))));
        let first = compiled("^RN-[0-9]{4}$").expect("pattern compiles");
        let second = compiled("^RN-[0-9]{4}$").expect("pattern compiles");
        assert_eq!(first.as_str(), second.as_str());
    }

    #[test]
    fn uncompilable_patterns_are_cached_as_skipped() {
        let fields = fields(json!([
            {"key": "code", "label": "Code", "type": "text", "validation": {"pattern": "([0-9"}}
        ]));
        assert!(validate_submission(&fields, &data(json!({"code": "anything"})), &FileMap::default()).valid);
        assert!(matches!(pattern_cache().read().get("([0-9"), Some(None)));
    }

    #[test]
    fn optional_empty_fields_skip_type_checks() {
        let fields = fields(json!([
            {"key": "guardianContact", "label": "Guardian Contact", "type": "text",
             "validation": {"pattern": "^03[0-9]{9}$"}},
            {"key": "altEmail", "label": "Alt Email", "type": "email"}
        ]));
        let result = validate_submission(
            &fields,
            &data(json!({"guardianContact": "", "altEmail": null})),
            &FileMap::default(),
        );
        assert!(result.valid);
    }

    #[test]
    fn accumulates_every_failure() {
        let fields = fields(json!([
            {"key": "a", "label": "A", "type": "text", "required": true},
            {"key": "b", "label": "B", "type": "email", "required": true},
            {"key": "c", "label": "C", "type": "number"}
        ]));
        let result = validate_submission(&fields, &data(json!({"b": "nope", "c": "x"})), &FileMap::default());
        let fields: Vec<&str> = result.errors.iter().map(|error| error.field.as_str()).collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
        assert!(result.error_for("b").is_some());
    }
}
