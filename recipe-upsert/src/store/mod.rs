//! Versioned document stores the recipe collection is read from and committed to.
//!
//! A store hands out an opaque version token with every document it returns.
//! Passing that token back on commit makes the write conditional: the store
//! rejects it if the document changed in the meantime.

mod filesystem;
mod github;
#[cfg(test)]
pub mod memory;

pub use filesystem::FilesystemStore;
pub use github::GitHubStore;

use crate::config::{StoreBackend, StoreConfig};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("missing {0}")]
    Misconfigured(&'static str),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("version conflict: {0}")]
    Conflict(String),

    #[error("invalid document encoding: {0}")]
    Encoding(String),

    #[error("invalid document path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A document as currently stored, with the token identifying this revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredDocument {
    pub content: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitRequest {
    pub path: String,
    pub branch: String,
    pub content: String,
    pub message: String,
    /// Token from the fetch this write is based on. `None` creates the document.
    pub version: Option<String>,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `Ok(None)` when the document does not exist yet.
    async fn fetch(&self, path: &str, branch: &str) -> Result<Option<StoredDocument>, StoreError>;

    async fn commit(&self, request: CommitRequest) -> Result<(), StoreError>;
}

/// Builds the store selected by `config`.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn ContentStore>, StoreError> {
    match &config.backend {
        StoreBackend::Github(github) => {
            let token = github
                .token
                .clone()
                .ok_or(StoreError::Misconfigured("GitHub token"))?;
            let owner = github
                .owner
                .clone()
                .ok_or(StoreError::Misconfigured("GitHub owner"))?;
            let repo = github
                .repo
                .clone()
                .ok_or(StoreError::Misconfigured("GitHub repository"))?;

            Ok(Arc::new(GitHubStore::new(
                github.api_url.clone(),
                owner,
                repo,
                token,
            )))
        }
        StoreBackend::Filesystem { base_dir } => Ok(Arc::new(FilesystemStore::new(base_dir))),
    }
}
