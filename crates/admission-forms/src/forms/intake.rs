use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::schema::{FieldType, FormSchema};
use super::service::StepOutcome;

/// Binary attachment received with a submission, held in memory for the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub field_key: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl FileUpload {
    pub fn new(
        field_key: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        bytes: Bytes,
    ) -> Self {
        let file_name = file_name.into();
        let content_type = content_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .to_string()
            });
        Self {
            field_key: field_key.into(),
            file_name,
            content_type,
            bytes,
        }
    }
}

/// Uploads grouped by the field they were submitted for.
#[derive(Debug, Clone, Default)]
pub struct FileMap {
    by_field: BTreeMap<String, Vec<FileUpload>>,
}

impl FileMap {
    pub fn insert(&mut self, upload: FileUpload) {
        self.by_field
            .entry(upload.field_key.clone())
            .or_default()
            .push(upload);
    }

    pub fn for_field(&self, key: &str) -> &[FileUpload] {
        self.by_field.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileUpload> {
        self.by_field.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_field.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps only uploads addressed to public `file` fields of `schema`.
    pub fn retain_schema_files(&mut self, schema: &FormSchema) {
        self.by_field.retain(|key, _| {
            let keep = schema
                .field(key)
                .map(|field| field.is_public() && field.field_type == FieldType::File)
                .unwrap_or(false);
            if !keep {
                debug!(form = %schema.slug, field = %key, "dropping upload for unknown file field");
            }
            keep
        });
    }
}

impl FromIterator<FileUpload> for FileMap {
    fn from_iter<T: IntoIterator<Item = FileUpload>>(iter: T) -> Self {
        let mut map = FileMap::default();
        for upload in iter {
            map.insert(upload);
        }
        map
    }
}

/// Reference to an object held by file storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl FileRef {
    pub fn is_remote(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored file '{0}' not found")]
    NotFound(String),
    #[error("file storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage provider boundary for attachments and generated documents.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn put(&self, name: &str, content_type: &str, bytes: Bytes)
        -> Result<FileRef, StorageError>;
    async fn read(&self, file: &FileRef) -> Result<Bytes, StorageError>;
}

fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("upload");
    let cleaned: String = base
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Stores objects under a local directory served at `/uploads`.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
    public_prefix: String,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_prefix: "/uploads".to_string(),
        }
    }

    fn path_for(&self, file: &FileRef) -> Result<PathBuf, StorageError> {
        let stored = file
            .url
            .strip_prefix(&self.public_prefix)
            .map(|rest| rest.trim_start_matches('/'))
            .filter(|rest| !rest.is_empty() && !rest.contains('/') && !rest.contains(".."))
            .ok_or_else(|| StorageError::NotFound(file.url.clone()))?;
        Ok(self.root.join(stored))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<FileRef, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let stored_name = format!("{id}-{}", sanitize_file_name(name));
        let size = bytes.len() as u64;
        tokio::fs::write(self.root.join(&stored_name), &bytes).await?;

        Ok(FileRef {
            id,
            name: name.to_string(),
            mime: content_type.to_string(),
            size,
            url: format!("{}/{stored_name}", self.public_prefix),
            field: None,
        })
    }

    async fn read(&self, file: &FileRef) -> Result<Bytes, StorageError> {
        let path = self.path_for(file)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(file.url.clone()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

/// Volatile storage used by tests and tooling.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileStorage {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl InMemoryFileStorage {
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn put(
        &self,
        name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<FileRef, StorageError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let url = format!("memory://{id}/{}", sanitize_file_name(name));
        let size = bytes.len() as u64;
        self.objects.write().insert(url.clone(), bytes);
        Ok(FileRef {
            id,
            name: name.to_string(),
            mime: content_type.to_string(),
            size,
            url,
            field: None,
        })
    }

    async fn read(&self, file: &FileRef) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .get(&file.url)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(file.url.clone()))
    }
}

/// Pushes request uploads to file storage one by one; a failed file is reported and
/// left out rather than failing the batch.
pub struct FileIntake {
    storage: Arc<dyn FileStorage>,
}

impl FileIntake {
    pub fn new(storage: Arc<dyn FileStorage>) -> Self {
        Self { storage }
    }

    pub async fn upload(&self, files: &FileMap) -> Vec<StepOutcome<FileRef>> {
        let mut outcomes = Vec::with_capacity(files.len());
        for upload in files.iter() {
            let result = self
                .storage
                .put(&upload.file_name, &upload.content_type, upload.bytes.clone())
                .await;
            match result {
                Ok(mut file) => {
                    file.field = Some(upload.field_key.clone());
                    outcomes.push(StepOutcome::Completed(file));
                }
                Err(err) => {
                    warn!(field = %upload.field_key, file = %upload.file_name, error = %err, "file upload failed; continuing without it");
                    outcomes.push(StepOutcome::failed(format!(
                        "{} ({}): {err}",
                        upload.file_name, upload.field_key
                    )));
                }
            }
        }
        outcomes
    }
}
