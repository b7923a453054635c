use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::intake::{FileRef, FileStorage};
use super::pdf::RenderedPdf;
use super::repository::{RepositoryError, SubmissionRepository};
use super::schema::{FormId, FormSchema};
use super::service::StepOutcome;

/// Submitted values keyed by field key.
pub type SubmissionData = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One accepted instance of form data plus its attachments and request metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: SubmissionId,
    #[serde(rename = "formRef")]
    pub form_id: FormId,
    pub form_name: String,
    pub data: SubmissionData,
    pub files: Vec<FileRef>,
    pub pdf: Option<FileRef>,
    pub submitted_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub locale: String,
}

impl Submission {
    /// Applies a patch. `data` is merged key by key with incoming keys winning; every
    /// other provided attribute replaces the stored one.
    pub fn apply(&mut self, patch: SubmissionPatch) {
        if let Some(data) = patch.data {
            for (key, value) in data {
                self.data.insert(key, value);
            }
        }
        if let Some(locale) = patch.locale {
            self.locale = locale;
        }
        if let Some(form_name) = patch.form_name {
            self.form_name = form_name;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPatch {
    #[serde(default)]
    pub data: Option<SubmissionData>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub form_name: Option<String>,
}

/// Everything needed to persist an accepted request. Attachments have already been
/// pushed to file storage by the intake step.
#[derive(Debug, Clone)]
pub struct NewSubmission<'a> {
    pub form: &'a FormSchema,
    pub data: SubmissionData,
    pub files: Vec<FileRef>,
    pub pdf: Option<&'a RenderedPdf>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub locale: String,
}

#[derive(Debug, Clone)]
pub struct StoredSubmission {
    pub submission: Submission,
    /// Outcome of pushing the generated PDF to file storage.
    pub pdf_upload: StepOutcome<FileRef>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionStoreError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Persists submissions and the artifacts that belong to them.
pub struct SubmissionStore {
    repository: Arc<dyn SubmissionRepository>,
    files: Arc<dyn FileStorage>,
}

impl SubmissionStore {
    pub fn new(repository: Arc<dyn SubmissionRepository>, files: Arc<dyn FileStorage>) -> Self {
        Self { repository, files }
    }

    /// Creates the submission record. A PDF that cannot be stored leaves `pdf` empty;
    /// only a repository failure fails the call.
    pub async fn create(
        &self,
        request: NewSubmission<'_>,
    ) -> Result<StoredSubmission, SubmissionStoreError> {
        let submitted_at = Utc::now();

        let pdf_upload = match request.pdf {
            Some(pdf) => {
                let name = format!("submission-{}.pdf", submitted_at.timestamp_millis());
                match self
                    .files
                    .put(&name, mime::APPLICATION_PDF.as_ref(), pdf.bytes.clone())
                    .await
                {
                    Ok(file) => StepOutcome::Completed(file),
                    Err(err) => {
                        warn!(form = %request.form.slug, error = %err, "storing submission pdf failed");
                        StepOutcome::failed(err)
                    }
                }
            }
            None => StepOutcome::Skipped,
        };

        let submission = Submission {
            id: SubmissionId::generate(),
            form_id: request.form.id.clone(),
            form_name: request.form.name.clone(),
            data: request.data,
            files: request.files,
            pdf: pdf_upload.completed().cloned(),
            submitted_at,
            ip: request.ip,
            user_agent: request.user_agent,
            locale: request.locale,
        };

        let submission = self.repository.insert(submission)?;
        info!(
            submission = %submission.id,
            form = %request.form.slug,
            files = submission.files.len(),
            pdf = submission.pdf.is_some(),
            "submission stored"
        );

        Ok(StoredSubmission {
            submission,
            pdf_upload,
        })
    }

    pub fn fetch(&self, id: &SubmissionId) -> Result<Submission, SubmissionStoreError> {
        let submission = self
            .repository
            .fetch(id)?
            .ok_or(RepositoryError::NotFound)?;
        Ok(submission)
    }

    /// Applies the merge-on-update policy and persists the result.
    pub fn update(
        &self,
        id: &SubmissionId,
        patch: SubmissionPatch,
    ) -> Result<Submission, SubmissionStoreError> {
        Ok(self.repository.merge(id, patch)?)
    }

    pub fn files(&self) -> &Arc<dyn FileStorage> {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(data: Value) -> Submission {
        Submission {
            id: SubmissionId("sub-1".to_string()),
            form_id: FormId("1".to_string()),
            form_name: "Admission Form".to_string(),
            data: data.as_object().cloned().expect("object"),
            files: Vec::new(),
            pdf: None,
            submitted_at: Utc::now(),
            ip: Some("203.0.113.9".to_string()),
            user_agent: None,
            locale: "en".to_string(),
        }
    }

    #[test]
    fn data_patch_merges_instead_of_replacing() {
        let mut stored = submission(json!({"a": 1, "b": 1}));
        stored.apply(SubmissionPatch {
            data: json!({"b": 2}).as_object().cloned(),
            ..SubmissionPatch::default()
        });
        assert_eq!(Value::Object(stored.data), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn non_data_attributes_replace() {
        let mut stored = submission(json!({"a": 1}));
        stored.apply(SubmissionPatch {
            data: None,
            locale: Some("ur".to_string()),
            form_name: None,
        });
        assert_eq!(stored.locale, "ur");
        assert_eq!(stored.form_name, "Admission Form");
        assert_eq!(Value::Object(stored.data), json!({"a": 1}));
    }

    #[test]
    fn serializes_form_reference_in_camel_case() {
        let payload = serde_json::to_value(submission(json!({}))).expect("serializes");
        assert_eq!(payload["formRef"], json!("1"));
        assert!(payload.get("submittedAt").is_some());
        assert_eq!(payload["pdf"], Value::Null);
    }
}
