use std::fs;
use std::path::Path;

use crate::cli::{FormSource, SchemaArgs, ValidateArgs};
use crate::infra::load_forms;
use admission_forms::error::AppError;
use admission_forms::forms::{
    validate_submission, FileMap, FileUpload, FormRepository, FormSchema, SubmissionData,
    ValidationResult,
};
use bytes::Bytes;
use serde_json::Value;

pub(crate) fn run_schema(args: SchemaArgs) -> Result<(), AppError> {
    let schema = resolve_form(&args.source)?;
    println!("{}", to_pretty_json(&schema.public_view())?);
    Ok(())
}

/// Prints the validation result and reports whether the payload passed.
pub(crate) fn run_validate(args: ValidateArgs) -> Result<bool, AppError> {
    let schema = resolve_form(&args.source)?;
    let data = read_payload(&args.data)?;
    let files = args
        .files
        .iter()
        .map(|arg| read_upload(arg))
        .collect::<Result<FileMap, AppError>>()?;

    let result = validate(&schema, &data, &files);
    println!("{}", to_pretty_json(&result)?);
    Ok(result.valid)
}

fn validate(schema: &FormSchema, data: &SubmissionData, files: &FileMap) -> ValidationResult {
    validate_submission(&schema.fields, data, files)
}

fn resolve_form(source: &FormSource) -> Result<FormSchema, AppError> {
    let forms = load_forms(source.forms_dir.as_deref(), source.forms_dir.is_none())?;
    forms
        .find_active(&source.slug, &source.locale)?
        .ok_or_else(|| AppError::Input(format!("form '{}' not found", source.slug)))
}

fn read_payload(path: &Path) -> Result<SubmissionData, AppError> {
    let raw = fs::read(path)?;
    let value: Value = serde_json::from_slice(&raw)
        .map_err(|err| AppError::Input(format!("{} is not valid JSON: {err}", path.display())))?;
    payload_object(value)
        .ok_or_else(|| AppError::Input(format!("{} must hold a JSON object", path.display())))
}

fn payload_object(value: Value) -> Option<SubmissionData> {
    match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Object(inner)) => Some(inner),
            Some(other) => {
                map.insert("data".to_string(), other);
                Some(map)
            }
            None => Some(map),
        },
        _ => None,
    }
}

fn read_upload(arg: &str) -> Result<FileUpload, AppError> {
    let (key, path) = arg
        .split_once('=')
        .filter(|(key, path)| !key.is_empty() && !path.is_empty())
        .ok_or_else(|| AppError::Input(format!("--file expects KEY=PATH (got '{arg}')")))?;
    let path = Path::new(path);
    let bytes = fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = mime_guess::from_path(path)
        .first_raw()
        .map(str::to_string);
    Ok(FileUpload::new(key, file_name, content_type, Bytes::from(bytes)))
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string_pretty(value).map_err(|err| AppError::Input(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_forms::forms::ADMISSION_FORM_SLUG;
    use serde_json::json;
    use std::io::Write;

    fn builtin(locale: &str) -> FormSource {
        FormSource {
            slug: ADMISSION_FORM_SLUG.to_string(),
            locale: locale.to_string(),
            forms_dir: None,
        }
    }

    #[test]
    fn builtin_admission_form_resolves() {
        let schema = resolve_form(&builtin("en")).expect("builtin form");
        assert_eq!(schema.slug, ADMISSION_FORM_SLUG);
        assert!(schema.send_pdf);
    }

    #[test]
    fn unknown_slug_is_reported() {
        let mut source = builtin("en");
        source.slug = "missing".to_string();
        let err = resolve_form(&source).unwrap_err();
        assert!(err.to_string().contains("form 'missing' not found"));
    }

    #[test]
    fn payload_accepts_wrapped_and_bare_objects() {
        let wrapped = payload_object(json!({"data": {"gender": "Male"}})).unwrap();
        assert_eq!(wrapped.get("gender"), Some(&json!("Male")));

        let bare = payload_object(json!({"gender": "Female"})).unwrap();
        assert_eq!(bare.get("gender"), Some(&json!("Female")));

        assert!(payload_object(json!(["not", "an", "object"])).is_none());
    }

    #[test]
    fn empty_payload_reports_required_fields() {
        let schema = resolve_form(&builtin("en")).expect("builtin form");
        let result = validate(&schema, &SubmissionData::new(), &FileMap::default());
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|error| error.message.ends_with("is required")));
    }

    #[test]
    fn upload_argument_reads_file_and_guesses_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("photo.png");
        let mut file = fs::File::create(&path).expect("create file");
        file.write_all(b"\x89PNG").expect("write file");

        let upload = read_upload(&format!("studentPhoto={}", path.display())).expect("upload");
        assert_eq!(upload.field_key, "studentPhoto");
        assert_eq!(upload.file_name, "photo.png");
        assert_eq!(upload.content_type, "image/png");
        assert_eq!(upload.bytes.len(), 4);

        assert!(read_upload("no-separator").is_err());
    }
}
