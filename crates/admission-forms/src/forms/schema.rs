//! Form schema types as delivered by the content store.
//!
//! Option lists arrive in three shapes (plain strings, `{value,label}` entries, or
//! `{values:[...]}`); they are flattened into an ordered list of option values while
//! deserializing so nothing past this module sees the union.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of a form as assigned by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(pub String);

impl std::fmt::Display for FormId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Number,
    Select,
    Radio,
    Checkbox,
    Date,
    File,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    #[default]
    Public,
    AdminOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl ValidationRules {
    /// `pattern` and `regex` are both honored; `pattern` is checked first.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.pattern.as_deref().into_iter().chain(self.regex.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFieldDef {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, deserialize_with = "deserialize_options")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

impl FormFieldDef {
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOptions {
    List(Vec<RawOption>),
    Values { values: Vec<RawOption> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOption {
    Text(String),
    Entry { value: serde_json::Value },
    Scalar(serde_json::Value),
}

impl RawOption {
    fn into_value(self) -> Option<String> {
        let value = match self {
            RawOption::Text(text) => return Some(text),
            RawOption::Entry { value } => value,
            RawOption::Scalar(value) => value,
        };
        match value {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Number(number) => Some(number.to_string()),
            serde_json::Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }
}

fn deserialize_options<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawOptions>::deserialize(deserializer)?;
    let entries = match raw {
        None => return Ok(Vec::new()),
        Some(RawOptions::List(entries)) | Some(RawOptions::Values { values: entries }) => entries,
    };
    Ok(entries.into_iter().filter_map(RawOption::into_value).collect())
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_rate_limit() -> u32 {
    10
}

fn default_active() -> bool {
    true
}

/// Complete definition of one submittable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    pub id: FormId,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub fields: Vec<FormFieldDef>,
    #[serde(default)]
    pub success_message: Option<String>,
    #[serde(default = "default_rate_limit", rename = "rateLimitPerIP")]
    pub rate_limit_per_ip: u32,
    #[serde(default)]
    pub notification_emails: Vec<String>,
    #[serde(default)]
    pub send_pdf: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Thank you for your submission!";

impl FormSchema {
    pub fn field(&self, key: &str) -> Option<&FormFieldDef> {
        self.fields.iter().find(|field| field.key == key)
    }

    pub fn public_fields(&self) -> impl Iterator<Item = &FormFieldDef> {
        self.fields.iter().filter(|field| field.is_public())
    }

    pub fn success_message(&self) -> &str {
        self.success_message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(DEFAULT_SUCCESS_MESSAGE)
    }

    /// Checks the invariants a schema must hold before it can serve submissions.
    pub fn validate_definition(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.key.trim().is_empty() {
                return Err(SchemaError::EmptyFieldKey {
                    slug: self.slug.clone(),
                });
            }
            if !seen.insert(field.key.as_str()) {
                return Err(SchemaError::DuplicateFieldKey {
                    slug: self.slug.clone(),
                    key: field.key.clone(),
                });
            }
            if let Some(rules) = &field.validation {
                for pattern in rules.patterns() {
                    Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
                        key: field.key.clone(),
                        source,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Schema as exposed on the public endpoint: admin-only fields are removed and
    /// delivery settings (recipients, rate limits) are not included.
    pub fn public_view(&self) -> PublicFormView {
        PublicFormView {
            id: self.id.clone(),
            name: self.name.clone(),
            slug: self.slug.clone(),
            description: self.description.clone(),
            locale: self.locale.clone(),
            fields: self.public_fields().cloned().collect(),
            success_message: self.success_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicFormView {
    pub id: FormId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub locale: String,
    pub fields: Vec<FormFieldDef>,
    pub success_message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("form '{slug}' declares a field with an empty key")]
    EmptyFieldKey { slug: String },
    #[error("form '{slug}' declares field '{key}' more than once")]
    DuplicateFieldKey { slug: String, key: String },
    #[error("field '{key}' has an invalid pattern")]
    InvalidPattern { key: String, source: regex::Error },
    #[error("unable to read form schema {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("form schema {path} is not valid JSON: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_with_options(options: serde_json::Value) -> FormFieldDef {
        serde_json::from_value(json!({
            "key": "city",
            "label": "City",
            "type": "select",
            "required": true,
            "options": options,
        }))
        .expect("field parses")
    }

    #[test]
    fn option_shapes_normalize_to_values() {
        let plain = field_with_options(json!(["Lahore", "Karachi"]));
        let labelled = field_with_options(json!([
            {"value": "Lahore", "label": "Lahore (Punjab)"},
            {"value": "Karachi", "label": "Karachi (Sindh)"}
        ]));
        let wrapped = field_with_options(json!({"values": ["Lahore", "Karachi"]}));

        assert_eq!(plain.options, vec!["Lahore", "Karachi"]);
        assert_eq!(labelled.options, plain.options);
        assert_eq!(wrapped.options, plain.options);
    }

    #[test]
    fn missing_and_null_options_are_empty() {
        let field: FormFieldDef = serde_json::from_value(json!({
            "key": "name", "label": "Name", "type": "text", "options": null
        }))
        .expect("field parses");
        assert!(field.options.is_empty());
        assert_eq!(field.visibility, Visibility::Public);
        assert!(!field.required);
    }

    #[test]
    fn admin_only_visibility_parses() {
        let field: FormFieldDef = serde_json::from_value(json!({
            "key": "notes", "label": "Internal Notes", "type": "textarea",
            "visibility": "admin-only"
        }))
        .expect("field parses");
        assert!(!field.is_public());
    }

    fn schema(fields: serde_json::Value) -> FormSchema {
        serde_json::from_value(json!({
            "id": "7",
            "slug": "contact",
            "name": "Contact",
            "fields": fields,
            "notificationEmails": ["office@example.org"],
            "rateLimitPerIP": 3,
        }))
        .expect("schema parses")
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let schema = schema(json!([
            {"key": "name", "label": "Name", "type": "text"},
            {"key": "name", "label": "Name again", "type": "text"}
        ]));
        let err = schema.validate_definition().unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateFieldKey { ref key, .. } if key == "name"));
    }

    #[test]
    fn broken_patterns_are_rejected() {
        let schema = schema(json!([
            {"key": "code", "label": "Code", "type": "text", "validation": {"pattern": "([0-9"}}
        ]));
        assert!(matches!(
            schema.validate_definition(),
            Err(SchemaError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn public_view_hides_admin_fields_and_delivery_settings() {
        let schema = schema(json!([
            {"key": "name", "label": "Name", "type": "text", "required": true},
            {"key": "notes", "label": "Notes", "type": "textarea", "visibility": "admin-only"}
        ]));
        assert_eq!(schema.rate_limit_per_ip, 3);

        let view = serde_json::to_value(schema.public_view()).expect("serializes");
        let keys: Vec<&str> = view["fields"]
            .as_array()
            .expect("fields array")
            .iter()
            .filter_map(|field| field["key"].as_str())
            .collect();
        assert_eq!(keys, vec!["name"]);
        assert!(view.get("notificationEmails").is_none());
        assert!(view.get("rateLimitPerIP").is_none());
        assert_eq!(schema.success_message(), DEFAULT_SUCCESS_MESSAGE);
    }
}
