use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use super::schema::{FormId, FormSchema, SchemaError};
use super::submissions::{Submission, SubmissionId, SubmissionPatch};

/// Read/write access to form schemas owned by the content store.
pub trait FormRepository: Send + Sync {
    /// Active form by slug; prefers the requested locale, then `en`, then any locale.
    fn find_active(&self, slug: &str, locale: &str) -> Result<Option<FormSchema>, RepositoryError>;
    fn upsert(&self, schema: FormSchema) -> Result<FormSchema, RepositoryError>;
    fn list(&self) -> Result<Vec<FormSchema>, RepositoryError>;
}

/// Persistence for accepted submissions.
pub trait SubmissionRepository: Send + Sync {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError>;
    /// Applies `patch` to the stored record in one step, so concurrent patches to
    /// different keys all survive.
    fn merge(&self, id: &SubmissionId, patch: SubmissionPatch) -> Result<Submission, RepositoryError>;
    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError>;
    fn list_for_form(&self, form_id: &FormId) -> Result<Vec<Submission>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("invalid form schema: {0}")]
    Invalid(#[from] SchemaError),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Default, Clone)]
pub struct InMemoryFormRepository {
    forms: Arc<RwLock<HashMap<(String, String), FormSchema>>>,
}

impl InMemoryFormRepository {
    pub fn with_forms<I>(forms: I) -> Result<Self, RepositoryError>
    where
        I: IntoIterator<Item = FormSchema>,
    {
        let repository = Self::default();
        for form in forms {
            repository.upsert(form)?;
        }
        Ok(repository)
    }

    /// Loads every `*.json` file in `dir` as a [`FormSchema`].
    pub fn load_dir(&self, dir: &Path) -> Result<usize, SchemaError> {
        let io_err = |source| SchemaError::Io {
            path: dir.display().to_string(),
            source,
        };
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|source| SchemaError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let schema: FormSchema =
                serde_json::from_str(&raw).map_err(|source| SchemaError::Json {
                    path: path.display().to_string(),
                    source,
                })?;
            schema.validate_definition()?;
            tracing::info!(slug = %schema.slug, locale = %schema.locale, path = %path.display(), "loaded form schema");
            self.insert_checked(schema);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn insert_checked(&self, schema: FormSchema) {
        let key = (schema.slug.clone(), schema.locale.clone());
        self.forms.write().insert(key, schema);
    }
}

impl FormRepository for InMemoryFormRepository {
    fn find_active(&self, slug: &str, locale: &str) -> Result<Option<FormSchema>, RepositoryError> {
        let guard = self.forms.read();
        let lookup = |locale: &str| {
            guard
                .get(&(slug.to_string(), locale.to_string()))
                .filter(|form| form.active)
        };

        let found = lookup(locale).or_else(|| lookup("en")).or_else(|| {
            let mut candidates: Vec<&FormSchema> = guard
                .values()
                .filter(|form| form.slug == slug && form.active)
                .collect();
            candidates.sort_by(|a, b| a.locale.cmp(&b.locale));
            candidates.into_iter().next()
        });

        Ok(found.cloned())
    }

    fn upsert(&self, schema: FormSchema) -> Result<FormSchema, RepositoryError> {
        schema.validate_definition()?;
        self.insert_checked(schema.clone());
        Ok(schema)
    }

    fn list(&self) -> Result<Vec<FormSchema>, RepositoryError> {
        let mut forms: Vec<FormSchema> = self.forms.read().values().cloned().collect();
        forms.sort_by(|a, b| (&a.slug, &a.locale).cmp(&(&b.slug, &b.locale)));
        Ok(forms)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySubmissionRepository {
    records: Arc<RwLock<HashMap<SubmissionId, Submission>>>,
}

impl InMemorySubmissionRepository {
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl SubmissionRepository for InMemorySubmissionRepository {
    fn insert(&self, submission: Submission) -> Result<Submission, RepositoryError> {
        let mut guard = self.records.write();
        if guard.contains_key(&submission.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    fn merge(&self, id: &SubmissionId, patch: SubmissionPatch) -> Result<Submission, RepositoryError> {
        let mut guard = self.records.write();
        let existing = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        existing.apply(patch);
        Ok(existing.clone())
    }

    fn fetch(&self, id: &SubmissionId) -> Result<Option<Submission>, RepositoryError> {
        Ok(self.records.read().get(id).cloned())
    }

    fn list_for_form(&self, form_id: &FormId) -> Result<Vec<Submission>, RepositoryError> {
        let mut submissions: Vec<Submission> = self
            .records
            .read()
            .values()
            .filter(|submission| &submission.form_id == form_id)
            .cloned()
            .collect();
        submissions.sort_by_key(|submission| submission.submitted_at);
        Ok(submissions)
    }
}
