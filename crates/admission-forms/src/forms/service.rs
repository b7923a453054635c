use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiErrorKind};

use super::intake::{FileIntake, FileMap, FileRef, FileStorage, StorageError};
use super::notify::{Notification, NotificationReport, Notifier};
use super::pdf::{PdfError, PdfRenderer, RenderedPdf};
use super::rate_limit::RateLimiter;
use super::repository::{FormRepository, RepositoryError, SubmissionRepository};
use super::schema::{FieldType, FormSchema, PublicFormView};
use super::submissions::{
    NewSubmission, Submission, SubmissionData, SubmissionId, SubmissionPatch, SubmissionStore,
    SubmissionStoreError,
};
use super::validation::{validate_submission, FieldError};

pub const DEFAULT_PDF_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a best-effort pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome<T> {
    Completed(T),
    Skipped,
    Failed { reason: String },
}

impl<T> StepOutcome<T> {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            StepOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    Received,
    RateChecked,
    Validated,
    FilesUploaded,
    PdfAttempted,
    Stored,
    Notified,
    Responded,
    RejectedRateLimit,
    RejectedValidation,
    FailedInternal,
}

impl SubmissionStage {
    pub fn label(self) -> &'static str {
        match self {
            SubmissionStage::Received => "received",
            SubmissionStage::RateChecked => "rate_checked",
            SubmissionStage::Validated => "validated",
            SubmissionStage::FilesUploaded => "files_uploaded",
            SubmissionStage::PdfAttempted => "pdf_attempted",
            SubmissionStage::Stored => "stored",
            SubmissionStage::Notified => "notified",
            SubmissionStage::Responded => "responded",
            SubmissionStage::RejectedRateLimit => "rejected_rate_limit",
            SubmissionStage::RejectedValidation => "rejected_validation",
            SubmissionStage::FailedInternal => "failed_internal",
        }
    }
}

/// Per-step outcomes of one accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub uploads: Vec<StepOutcome<FileRef>>,
    pub pdf: StepOutcome<FileRef>,
    pub notification: StepOutcome<NotificationReport>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Key used for rate limiting.
    pub fn client_id(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub slug: String,
    pub locale: String,
    pub data: SubmissionData,
    pub files: FileMap,
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub submission_id: SubmissionId,
    pub message: String,
    #[serde(skip)]
    pub stage: SubmissionStage,
    #[serde(skip)]
    pub report: PipelineReport,
}

/// Where to fetch a stored submission PDF from.
#[derive(Debug, Clone)]
pub enum PdfDownload {
    Inline { file_name: String, bytes: Bytes },
    Redirect(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Form not found or inactive")]
    FormNotFound(String),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("Validation failed")]
    Validation(Vec<FieldError>),
    #[error("Submission not found")]
    SubmissionNotFound(SubmissionId),
    #[error("PDF not available for this submission")]
    PdfNotAvailable(SubmissionId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Store(SubmissionStoreError),
}

impl From<SubmissionStoreError> for SubmitError {
    fn from(value: SubmissionStoreError) -> Self {
        match value {
            SubmissionStoreError::Repository(RepositoryError::NotFound) => {
                SubmitError::Repository(RepositoryError::NotFound)
            }
            other => SubmitError::Store(other),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(value: SubmitError) -> Self {
        match value {
            SubmitError::FormNotFound(_) => ApiError::not_found(value.to_string()),
            SubmitError::RateLimited => ApiError::new(ApiErrorKind::RateLimit, value.to_string()),
            SubmitError::Validation(errors) => {
                ApiError::new(ApiErrorKind::Validation, "Validation failed")
                    .with_details(json!({ "errors": errors }))
            }
            SubmitError::SubmissionNotFound(_)
            | SubmitError::PdfNotAvailable(_)
            | SubmitError::Repository(RepositoryError::NotFound) => {
                ApiError::not_found(value.to_string())
            }
            SubmitError::Repository(_) | SubmitError::Store(_) => {
                ApiError::internal("An error occurred while processing your submission")
            }
        }
    }
}

/// Composes schema lookup, rate limiting, validation, intake, PDF rendering, storage and
/// notification into the submit flow.
pub struct FormSubmissionService {
    forms: Arc<dyn FormRepository>,
    limiter: Arc<RateLimiter>,
    intake: FileIntake,
    renderer: Arc<dyn PdfRenderer>,
    store: SubmissionStore,
    notifier: Notifier,
    pdf_timeout: Duration,
    server_url: String,
}

impl FormSubmissionService {
    pub fn new(
        forms: Arc<dyn FormRepository>,
        submissions: Arc<dyn SubmissionRepository>,
        files: Arc<dyn FileStorage>,
        renderer: Arc<dyn PdfRenderer>,
        notifier: Notifier,
    ) -> Self {
        Self {
            forms,
            limiter: Arc::new(RateLimiter::in_memory()),
            intake: FileIntake::new(files.clone()),
            renderer,
            store: SubmissionStore::new(submissions, files),
            notifier,
            pdf_timeout: DEFAULT_PDF_TIMEOUT,
            server_url: "http://localhost:1337".to_string(),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_pdf_timeout(mut self, timeout: Duration) -> Self {
        self.pdf_timeout = timeout;
        self
    }

    /// Base URL prefixed to relative file URLs when redirecting downloads.
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn forms(&self) -> &Arc<dyn FormRepository> {
        &self.forms
    }

    fn active_form(&self, slug: &str, locale: &str) -> Result<FormSchema, SubmitError> {
        self.forms
            .find_active(slug, locale)?
            .ok_or_else(|| SubmitError::FormNotFound(slug.to_string()))
    }

    /// Public view of an active form.
    pub fn schema(&self, slug: &str, locale: &str) -> Result<PublicFormView, SubmitError> {
        Ok(self.active_form(slug, locale)?.public_view())
    }

    pub async fn submit(&self, request: SubmissionRequest) -> Result<SubmissionReceipt, SubmitError> {
        let SubmissionRequest {
            slug,
            locale,
            data,
            mut files,
            client,
        } = request;
        let client_id = client.client_id().to_string();
        stage(&slug, SubmissionStage::Received);

        let form = self.active_form(&slug, &locale)?;

        // Held until the submission is stored; any earlier return frees the slot.
        let limit = form.rate_limit_per_ip;
        let permit = if limit > 0 {
            match self.limiter.reserve(&form.id, &client_id, limit) {
                Some(permit) => Some(permit),
                None => {
                    warn!(form = %slug, client = %client_id, limit, "submission rejected by rate limit");
                    stage(&slug, SubmissionStage::RejectedRateLimit);
                    return Err(SubmitError::RateLimited);
                }
            }
        } else {
            None
        };
        stage(&slug, SubmissionStage::RateChecked);

        let data = accepted_data(&form, data);
        files.retain_schema_files(&form);
        let validation = validate_submission(&form.fields, &data, &files);
        if !validation.valid {
            debug!(form = %slug, errors = validation.errors.len(), "submission failed validation");
            stage(&slug, SubmissionStage::RejectedValidation);
            return Err(SubmitError::Validation(validation.errors));
        }
        stage(&slug, SubmissionStage::Validated);

        let uploads = self.intake.upload(&files).await;
        let stored_files: Vec<FileRef> = uploads.iter().filter_map(StepOutcome::completed).cloned().collect();
        stage(&slug, SubmissionStage::FilesUploaded);

        let rendered = if form.send_pdf {
            let outcome = match self.render_pdf(&form, &data, &stored_files).await {
                Ok(pdf) => StepOutcome::Completed(pdf),
                Err(err) => {
                    warn!(form = %slug, error = %err, "pdf generation failed; continuing without pdf");
                    StepOutcome::failed(err)
                }
            };
            stage(&slug, SubmissionStage::PdfAttempted);
            outcome
        } else {
            StepOutcome::Skipped
        };

        let stored = self
            .store
            .create(NewSubmission {
                form: &form,
                data,
                files: stored_files,
                pdf: rendered.completed(),
                ip: client.ip.clone(),
                user_agent: client.user_agent.clone(),
                locale: locale.clone(),
            })
            .await
            .map_err(|err| {
                stage(&slug, SubmissionStage::FailedInternal);
                tracing::error!(form = %slug, error = %err, "storing submission failed");
                SubmitError::from(err)
            })?;
        if let Some(permit) = permit {
            permit.commit();
        }
        stage(&slug, SubmissionStage::Stored);

        let pdf = match &rendered {
            StepOutcome::Completed(_) => stored.pdf_upload.clone(),
            StepOutcome::Failed { reason } => StepOutcome::failed(reason),
            StepOutcome::Skipped => StepOutcome::Skipped,
        };

        let notification = if form.notification_emails.is_empty() {
            StepOutcome::Skipped
        } else {
            let report = self
                .notifier
                .notify(Notification {
                    form: &form,
                    submission: &stored.submission,
                    recipients: &form.notification_emails,
                    pdf: rendered.completed(),
                    uploads: &files,
                })
                .await;
            stage(&slug, SubmissionStage::Notified);
            if report.delivered.is_empty() && !report.failed.is_empty() {
                StepOutcome::failed(format!("{} recipient(s) failed", report.failed.len()))
            } else {
                StepOutcome::Completed(report)
            }
        };

        info!(
            submission = %stored.submission.id,
            form = %slug,
            locale = %locale,
            "submission accepted"
        );
        stage(&slug, SubmissionStage::Responded);

        Ok(SubmissionReceipt {
            submission_id: stored.submission.id,
            message: form.success_message().to_string(),
            stage: SubmissionStage::Responded,
            report: PipelineReport {
                uploads,
                pdf,
                notification,
            },
        })
    }

    /// Renders on the blocking pool, bounded by the configured timeout.
    async fn render_pdf(
        &self,
        form: &FormSchema,
        data: &SubmissionData,
        files: &[FileRef],
    ) -> Result<RenderedPdf, PdfError> {
        let renderer = self.renderer.clone();
        let (form, data, files) = (form.clone(), data.clone(), files.to_vec());
        let task = tokio::task::spawn_blocking(move || renderer.render(&form, &data, &files));
        match tokio::time::timeout(self.pdf_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(PdfError::Aborted(join.to_string())),
            Err(_) => Err(PdfError::Timeout(self.pdf_timeout)),
        }
    }

    pub fn submission(&self, id: &SubmissionId) -> Result<Submission, SubmitError> {
        self.store.fetch(id).map_err(|err| not_found_as(err, id))
    }

    pub fn update_submission(
        &self,
        id: &SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<Submission, SubmitError> {
        let updated = self.store.update(id, patch).map_err(|err| not_found_as(err, id))?;
        info!(submission = %id, "submission updated");
        Ok(updated)
    }

    /// Serves stored bytes when readable, otherwise points the client at the file URL.
    pub async fn pdf_download(&self, id: &SubmissionId) -> Result<PdfDownload, SubmitError> {
        let submission = self.submission(id)?;
        let pdf = submission
            .pdf
            .ok_or_else(|| SubmitError::PdfNotAvailable(id.clone()))?;

        if !pdf.is_remote() {
            match self.store.files().read(&pdf).await {
                Ok(bytes) => {
                    return Ok(PdfDownload::Inline {
                        file_name: pdf.name,
                        bytes,
                    })
                }
                Err(StorageError::NotFound(_)) => {}
                Err(err) => warn!(submission = %id, error = %err, "reading stored pdf failed"),
            }
        }

        let location = if pdf.is_remote() {
            pdf.url
        } else {
            format!("{}{}", self.server_url, pdf.url)
        };
        Ok(PdfDownload::Redirect(location))
    }
}

fn not_found_as(err: SubmissionStoreError, id: &SubmissionId) -> SubmitError {
    match err {
        SubmissionStoreError::Repository(RepositoryError::NotFound) => {
            SubmitError::SubmissionNotFound(id.clone())
        }
        other => SubmitError::from(other),
    }
}

fn stage(slug: &str, stage: SubmissionStage) {
    debug!(form = %slug, stage = stage.label(), "submission stage");
}

/// Keeps values for public, non-file fields only.
fn accepted_data(form: &FormSchema, data: SubmissionData) -> SubmissionData {
    data.into_iter()
        .filter(|(key, _)| {
            let keep = form
                .field(key)
                .map(|field| field.is_public() && field.field_type != FieldType::File)
                .unwrap_or(false);
            if !keep {
                debug!(form = %form.slug, field = %key, "dropping submitted key");
            }
            keep
        })
        .collect()
}
