use super::{CommitRequest, ContentStore, StoreError, StoredDocument};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;

/// Stores documents under `base_dir/<branch>/<path>`, for local development.
///
/// The version token is the hex SHA-256 of the content. Commits are
/// serialized within the process so the version check and the write cannot
/// interleave.
pub struct FilesystemStore {
    base_dir: PathBuf,
    commit_lock: Mutex<()>,
}

impl FilesystemStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FilesystemStore {
            base_dir: base_dir.into(),
            commit_lock: Mutex::new(()),
        }
    }

    fn document_path(&self, path: &str, branch: &str) -> Result<PathBuf, StoreError> {
        let mut full = self.base_dir.join(relative(branch)?);
        full.push(relative(path)?);
        Ok(full)
    }

    async fn read(&self, full_path: &Path) -> Result<Option<StoredDocument>, StoreError> {
        match tokio::fs::read_to_string(full_path).await {
            Ok(content) => Ok(Some(StoredDocument {
                version: content_version(&content),
                content,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContentStore for FilesystemStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn fetch(&self, path: &str, branch: &str) -> Result<Option<StoredDocument>, StoreError> {
        let full_path = self.document_path(path, branch)?;
        self.read(&full_path).await
    }

    async fn commit(&self, request: CommitRequest) -> Result<(), StoreError> {
        let full_path = self.document_path(&request.path, &request.branch)?;
        let _guard = self.commit_lock.lock().await;

        let current = self.read(&full_path).await?.map(|doc| doc.version);
        match (current.as_deref(), request.version.as_deref()) {
            (None, None) => {}
            (Some(current), Some(expected)) if current == expected => {}
            (Some(_), None) => {
                return Err(StoreError::Conflict(format!(
                    "{} already exists",
                    request.path
                )));
            }
            (None, Some(_)) => {
                return Err(StoreError::Conflict(format!(
                    "{} no longer exists",
                    request.path
                )));
            }
            (Some(current), Some(expected)) => {
                return Err(StoreError::Conflict(format!(
                    "{} is at {current} but expected {expected}",
                    request.path
                )));
            }
        }

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a sibling file first so readers never see a partial document
        let staging = full_path.with_extension("tmp");
        tokio::fs::write(&staging, request.content.as_bytes()).await?;
        tokio::fs::rename(&staging, &full_path).await?;

        tracing::info!(
            path = %full_path.display(),
            message = %request.message,
            "Committed document to filesystem store"
        );

        Ok(())
    }
}

pub fn content_version(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

// Only plain relative components; the document must stay under base_dir.
fn relative(path: &str) -> Result<PathBuf, StoreError> {
    let relative: PathBuf = Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::CurDir))
        .map(|c| match c {
            Component::Normal(part) => Ok(part),
            _ => Err(StoreError::InvalidPath(path.to_string())),
        })
        .collect::<Result<_, _>>()?;

    if relative.as_os_str().is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }

    Ok(relative)
}
