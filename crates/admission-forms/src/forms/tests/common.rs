use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::LinkConfig;
use crate::forms::intake::{FileRef, InMemoryFileStorage};
use crate::forms::notify::{MailError, Mailer, Notifier, OutgoingEmail};
use crate::forms::pdf::{PdfError, PdfRenderer, RenderedPdf, SubmissionPdfRenderer};
use crate::forms::repository::{InMemoryFormRepository, InMemorySubmissionRepository};
use crate::forms::schema::FormSchema;
use crate::forms::service::{ClientInfo, FormSubmissionService, SubmissionRequest};
use crate::forms::submissions::SubmissionData;
use crate::forms::FileMap;

pub(super) const FORM_SLUG: &str = "student-intake";
pub(super) const CNIC_PATTERN: &str = "^[0-9]{5}-[0-9]{7}-[0-9]{1}$|^[0-9]{13}$";

/// Three required fields, an optional photo upload and one admin-only note.
pub(super) fn intake_form() -> FormSchema {
    serde_json::from_value(json!({
        "id": "7",
        "slug": FORM_SLUG,
        "name": "Student Intake",
        "description": "Short intake form",
        "locale": "en",
        "fields": [
            {"key": "fullNameEnglish", "label": "Full Name (English)", "type": "text", "required": true},
            {
                "key": "cnicBForm",
                "label": "CNIC / B-Form Number",
                "type": "text",
                "required": true,
                "validation": {"pattern": CNIC_PATTERN}
            },
            {"key": "gender", "label": "Gender", "type": "select", "required": true, "options": ["Male", "Female"]},
            {"key": "studentPhoto", "label": "Student Photo", "type": "file"},
            {"key": "reviewNotes", "label": "Review Notes", "type": "textarea", "visibility": "admin-only"}
        ],
        "successMessage": "We received your application.",
        "rateLimitPerIP": 3,
        "notificationEmails": ["office@example.org"],
        "sendPdf": true
    }))
    .expect("intake form parses")
}

pub(super) fn valid_data() -> SubmissionData {
    json!({
        "fullNameEnglish": "Ali",
        "cnicBForm": "12345-1234567-1",
        "gender": "Male"
    })
    .as_object()
    .cloned()
    .expect("object")
}

pub(super) fn request(data: SubmissionData, ip: &str) -> SubmissionRequest {
    SubmissionRequest {
        slug: FORM_SLUG.to_string(),
        locale: "en".to_string(),
        data,
        files: FileMap::default(),
        client: ClientInfo {
            ip: Some(ip.to_string()),
            user_agent: Some("integration-test".to_string()),
        },
    }
}

#[derive(Default)]
pub(super) struct RecordingMailer {
    pub(super) sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        self.sent.lock().push(email);
        Ok(())
    }
}

pub(super) struct UnreachableMailer;

#[async_trait]
impl Mailer for UnreachableMailer {
    async fn send(&self, _email: OutgoingEmail) -> Result<(), MailError> {
        Err(MailError::Transport("connection refused".to_string()))
    }
}

pub(super) struct FailingRenderer;

impl PdfRenderer for FailingRenderer {
    fn render(
        &self,
        _schema: &FormSchema,
        _data: &SubmissionData,
        _files: &[FileRef],
    ) -> Result<RenderedPdf, PdfError> {
        Err(PdfError::Backend("font table missing".to_string()))
    }
}

pub(super) struct PanickingRenderer;

impl PdfRenderer for PanickingRenderer {
    fn render(
        &self,
        _schema: &FormSchema,
        _data: &SubmissionData,
        _files: &[FileRef],
    ) -> Result<RenderedPdf, PdfError> {
        panic!("renderer crashed")
    }
}

/// Renders normally after blocking its worker for `delay`.
pub(super) struct SlowRenderer {
    pub(super) delay: Duration,
}

impl PdfRenderer for SlowRenderer {
    fn render(
        &self,
        schema: &FormSchema,
        data: &SubmissionData,
        files: &[FileRef],
    ) -> Result<RenderedPdf, PdfError> {
        std::thread::sleep(self.delay);
        SubmissionPdfRenderer.render(schema, data, files)
    }
}

pub(super) fn links() -> LinkConfig {
    LinkConfig {
        server_url: "http://localhost:1337".to_string(),
        admin_url: "http://localhost:1337".to_string(),
        app_name: "Admission Forms".to_string(),
    }
}

pub(super) struct Harness {
    pub(super) service: Arc<FormSubmissionService>,
    pub(super) submissions: InMemorySubmissionRepository,
    pub(super) files: InMemoryFileStorage,
    pub(super) mailer: Arc<RecordingMailer>,
}

pub(super) fn harness() -> Harness {
    harness_with(intake_form(), Arc::new(SubmissionPdfRenderer), None)
}

pub(super) fn harness_with(
    form: FormSchema,
    renderer: Arc<dyn PdfRenderer>,
    mailer: Option<Arc<dyn Mailer>>,
) -> Harness {
    let forms = InMemoryFormRepository::with_forms([form]).expect("form loads");
    let submissions = InMemorySubmissionRepository::default();
    let files = InMemoryFileStorage::default();
    let recording = Arc::new(RecordingMailer::default());
    let mailer = mailer.unwrap_or_else(|| recording.clone() as Arc<dyn Mailer>);

    let service = FormSubmissionService::new(
        Arc::new(forms),
        Arc::new(submissions.clone()),
        Arc::new(files.clone()),
        renderer,
        Notifier::new(mailer, links(), Duration::from_secs(5)),
    )
    .with_pdf_timeout(Duration::from_secs(10));

    Harness {
        service: Arc::new(service),
        submissions,
        files,
        mailer: recording,
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
