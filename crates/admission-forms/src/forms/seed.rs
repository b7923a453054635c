//! Built-in admission form, upserted at startup when seeding is enabled.

use chrono::{Datelike, Utc};
use serde_json::{json, Value};

use super::repository::{FormRepository, RepositoryError};
use super::schema::{FormSchema, SchemaError};

pub const ADMISSION_FORM_SLUG: &str = "admission-form";

const MOBILE_PATTERN: &str = "^03[0-9]{2}-[0-9]{7}$|^03[0-9]{9}$";
const MOBILE_MESSAGE: &str = "Please enter a valid mobile number (03XX-XXXXXXX)";

fn field(key: &str, label: &str, field_type: &str, required: bool) -> Value {
    json!({
        "key": key,
        "label": label,
        "type": field_type,
        "required": required,
        "visibility": "public",
    })
}

fn with(mut field: Value, attribute: &str, value: Value) -> Value {
    if let Value::Object(map) = &mut field {
        map.insert(attribute.to_string(), value);
    }
    field
}

fn placeholder(field: Value, text: &str) -> Value {
    with(field, "placeholder", json!(text))
}

fn help(field: Value, text: &str) -> Value {
    with(field, "helpText", json!(text))
}

fn mobile(key: &str, label: &str, required: bool) -> Value {
    with(
        placeholder(field(key, label, "text", required), "03XX-XXXXXXX"),
        "validation",
        json!({ "pattern": MOBILE_PATTERN, "message": MOBILE_MESSAGE }),
    )
}

fn document(key: &str, label: &str, hint: &str) -> Value {
    help(field(key, label, "file", true), hint)
}

fn admission_fields() -> Vec<Value> {
    let this_year = Utc::now().year();
    vec![
        // student
        placeholder(
            field("fullNameEnglish", "Full Name (English)", "text", true),
            "Enter your full name in English",
        ),
        placeholder(
            field("fullNameUrdu", "Full Name (Urdu)", "text", true),
            "Enter your full name in Urdu",
        ),
        placeholder(
            field("fathersName", "Father's Name", "text", true),
            "Enter your father's full name",
        ),
        field("dateOfBirth", "Date of Birth", "date", true),
        with(
            placeholder(
                field("cnicBForm", "CNIC / B-Form Number", "text", true),
                "Enter CNIC or B-Form number",
            ),
            "validation",
            json!({
                "pattern": "^[0-9]{5}-[0-9]{7}-[0-9]{1}$|^[0-9]{13}$",
                "message": "Please enter a valid CNIC (XXXXX-XXXXXXX-X) or B-Form number",
            }),
        ),
        with(field("gender", "Gender", "select", true), "options", json!(["Male", "Female"])),
        mobile("mobileNumber", "Mobile Number", true),
        placeholder(
            field("emailAddress", "Email Address", "email", true),
            "your.email@example.com",
        ),
        placeholder(
            field("currentAddress", "Current Address", "textarea", true),
            "Enter your complete current address",
        ),
        with(
            field("city", "City", "select", true),
            "options",
            json!([
                "Karachi", "Lahore", "Islamabad", "Rawalpindi", "Faisalabad", "Multan",
                "Hyderabad", "Gujranwala", "Peshawar", "Quetta", "Sialkot", "Bahawalpur",
                "Sargodha", "Sukkur", "Larkana", "Sheikhupura", "Rahim Yar Khan", "Jhang",
                "Gujrat", "Kasur", "Other"
            ]),
        ),
        document(
            "studentPhoto",
            "Student Photo",
            "Upload a recent passport-size photograph (JPG/PNG, max 5MB)",
        ),
        // family
        placeholder(
            field("fathersOccupation", "Father's Occupation", "text", true),
            "Enter your father's occupation",
        ),
        mobile("fathersContactNumber", "Father's Contact Number", true),
        with(
            field("monthlyIncome", "Monthly Income", "select", true),
            "options",
            json!([
                "Less than PKR 20,000",
                "PKR 20,000 - PKR 50,000",
                "PKR 50,000 - PKR 100,000",
                "PKR 100,000 - PKR 200,000",
                "PKR 200,000 - PKR 500,000",
                "More than PKR 500,000",
                "Prefer not to say"
            ]),
        ),
        help(
            placeholder(
                field("guardianName", "Guardian Name (if applicable)", "text", false),
                "Enter guardian name if different from father",
            ),
            "Only required if guardian is different from father",
        ),
        help(
            mobile("guardianContact", "Guardian Contact", false),
            "Only required if guardian is different from father",
        ),
        // education
        placeholder(
            field("lastSchoolMadrasa", "Last School / Madrasa Name", "text", true),
            "Enter the name of your last school or madrasa",
        ),
        placeholder(
            field("classGradeCompleted", "Class / Grade Completed", "text", true),
            "e.g., 10th, Matric, Intermediate, etc.",
        ),
        with(
            placeholder(field("yearCompleted", "Year Completed", "number", true), "YYYY"),
            "validation",
            json!({
                "min": 1990,
                "max": this_year,
                "message": format!("Please enter a valid year between 1990 and {this_year}"),
            }),
        ),
        placeholder(
            field("percentageGrades", "Percentage / Grades", "text", true),
            "e.g., 85%, A+, First Division, etc.",
        ),
        with(
            field("hifzStatus", "Hifz Status", "select", true),
            "options",
            json!(["Complete", "In Progress", "None"]),
        ),
        document(
            "previousCertificate",
            "Previous Certificate Upload",
            "Upload a scanned copy of your last educational certificate (PDF/JPG/PNG, max 10MB)",
        ),
        // program
        with(
            field("programApplyingFor", "Program Applying For", "select", true),
            "options",
            json!([
                "Hifz", "Aalim", "Dars-e-Nizami", "Nazira", "Tajweed", "Arabic Language",
                "Islamic Studies", "Other"
            ]),
        ),
        placeholder(
            field("classYearApplyingFor", "Class / Year Applying For", "text", true),
            "e.g., First Year, Second Year, Beginner, etc.",
        ),
        with(field("hostelRequired", "Hostel Required", "select", true), "options", json!(["Yes", "No"])),
        // documents
        document(
            "cnicBFormCopy",
            "CNIC / B-Form Copy",
            "Upload a scanned copy of your CNIC or B-Form (PDF/JPG/PNG, max 10MB)",
        ),
        document(
            "educationalCertificate",
            "Educational Certificate",
            "Upload a scanned copy of your educational certificate (PDF/JPG/PNG, max 10MB)",
        ),
        document(
            "fathersCNIC",
            "Father's CNIC",
            "Upload a scanned copy of your father's CNIC (PDF/JPG/PNG, max 10MB)",
        ),
        // additional
        help(
            placeholder(
                field("whyJoin", "Why do you want to join?", "textarea", true),
                "Please explain your motivation for joining Jamia Urwaa...",
            ),
            "Please provide a brief statement about why you want to join this institution",
        ),
        with(
            field("scholarshipRequired", "Scholarship Required", "select", true),
            "options",
            json!(["Yes", "No"]),
        ),
        help(
            field("declarationAgreement", "Declaration Agreement", "checkbox", true),
            "I agree to abide by the rules and regulations of Jamia Urwaa",
        ),
        document(
            "parentGuardianSignature",
            "Parent / Guardian Signature",
            "Upload a scanned copy of parent/guardian signature or digital signature (PDF/JPG/PNG, max 5MB)",
        ),
    ]
}

/// The admission form in the `en` locale.
pub fn admission_form() -> Result<FormSchema, SchemaError> {
    let schema = json!({
        "id": ADMISSION_FORM_SLUG,
        "slug": ADMISSION_FORM_SLUG,
        "name": "Admission Form",
        "description": "Comprehensive admission form for Jamia Urwaa with student, family, educational, and program information",
        "locale": "en",
        "fields": admission_fields(),
        "successMessage": "Thank you for your admission application! We will review your submission and contact you soon.",
        "rateLimitPerIP": 5,
        "notificationEmails": [],
        "sendPdf": true,
        "active": true,
    });
    let schema: FormSchema = serde_json::from_value(schema).map_err(|source| SchemaError::Json {
        path: format!("builtin:{ADMISSION_FORM_SLUG}"),
        source,
    })?;
    schema.validate_definition()?;
    Ok(schema)
}

/// Creates or replaces the admission form. Recipients configured on an existing
/// variant are kept.
pub fn seed_admission_form(forms: &dyn FormRepository) -> Result<FormSchema, RepositoryError> {
    let mut schema = admission_form()?;
    if let Some(existing) = forms
        .list()?
        .into_iter()
        .find(|form| form.slug == schema.slug && form.locale == schema.locale)
    {
        schema.id = existing.id;
        schema.notification_emails = existing.notification_emails;
    }
    let stored = forms.upsert(schema)?;
    tracing::info!(slug = %stored.slug, fields = stored.fields.len(), "admission form seeded");
    Ok(stored)
}
