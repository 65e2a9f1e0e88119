//! In-memory store for tests.

use super::{CommitRequest, ContentStore, StoreError, StoredDocument};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    document: Option<StoredDocument>,
    commits: Vec<CommitRequest>,
    fetches: usize,
    revision: usize,
}

/// Single-document store that records every commit it accepts.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_fetch: bool,
    fail_commit: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_document(content: &str) -> Self {
        let store = MemoryStore::default();
        store.state.lock().unwrap().document = Some(StoredDocument {
            content: content.into(),
            version: "v0".into(),
        });
        store
    }

    /// Every fetch fails with a 502.
    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    /// Every commit fails with a 503.
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Simulates another writer committing after our fetch.
    pub fn replace_document(&self, content: &str) {
        let mut state = self.state.lock().unwrap();
        state.revision += 1;
        state.document = Some(StoredDocument {
            content: content.into(),
            version: format!("external{}", state.revision),
        });
    }

    pub fn document(&self) -> Option<StoredDocument> {
        self.state.lock().unwrap().document.clone()
    }

    pub fn commits(&self) -> Vec<CommitRequest> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(
        &self,
        _path: &str,
        _branch: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;

        if self.fail_fetch {
            return Err(StoreError::Status {
                status: 502,
                detail: "Bad Gateway".into(),
            });
        }

        Ok(state.document.clone())
    }

    async fn commit(&self, request: CommitRequest) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();

        if self.fail_commit {
            return Err(StoreError::Status {
                status: 503,
                detail: "Service Unavailable".into(),
            });
        }

        let current = state.document.as_ref().map(|doc| doc.version.as_str());
        if current != request.version.as_deref() {
            return Err(StoreError::Conflict(format!(
                "{} does not match {}",
                request.path,
                current.unwrap_or("nothing")
            )));
        }

        state.revision += 1;
        state.document = Some(StoredDocument {
            content: request.content.clone(),
            version: format!("v{}", state.revision),
        });
        state.commits.push(request);
        Ok(())
    }
}
