//! Form schemas and the public submission pipeline.
//!
//! A submission flows through rate limiting, validation, file intake, PDF rendering,
//! storage and notification. Only the storage step is allowed to fail the request;
//! every other side effect is recorded as a [`StepOutcome`] on the receipt.

pub mod format;
pub mod intake;
pub mod notify;
pub mod pdf;
pub mod rate_limit;
pub mod repository;
pub mod router;
pub mod schema;
pub mod seed;
pub mod service;
pub mod submissions;
pub mod validation;

#[cfg(test)]
mod tests;

pub use intake::{
    FileIntake, FileMap, FileRef, FileStorage, FileUpload, InMemoryFileStorage,
    LocalFileStorage, StorageError,
};
pub use notify::{Mailer, MailError, Notifier, NotificationReport, OutgoingEmail, SmtpMailer};
pub use pdf::{PdfError, PdfRenderer, RenderedPdf, SubmissionPdfRenderer};
pub use rate_limit::{
    InMemoryRateLimitStore, RateLimitPermit, RateLimitStore, RateLimiter, COMPACTION_INTERVAL,
};
pub use repository::{
    FormRepository, InMemoryFormRepository, InMemorySubmissionRepository, RepositoryError,
    SubmissionRepository,
};
pub use router::form_router;
pub use schema::{FieldType, FormFieldDef, FormId, FormSchema, PublicFormView, SchemaError};
pub use seed::{admission_form, seed_admission_form, ADMISSION_FORM_SLUG};
pub use service::{
    ClientInfo, FormSubmissionService, PipelineReport, StepOutcome, SubmissionReceipt,
    SubmissionRequest, SubmissionStage, SubmitError,
};
pub use submissions::{Submission, SubmissionData, SubmissionId, SubmissionPatch};
pub use validation::{validate_submission, FieldError, ValidationResult};
