//! Read-modify-write of the recipe collection against a [`ContentStore`].

use crate::collection::Collection;
use crate::errors::{Result, UpsertError};
use crate::metrics_defs::{STORE_COMMIT_DURATION, STORE_FETCH_DURATION};
use crate::recipe::RecipeRecord;
use crate::store::{CommitRequest, ContentStore};
use shared::histogram;
use std::sync::Arc;
use std::time::Instant;

/// A decoded collection and the version token it was read at.
#[derive(Debug)]
pub struct LoadedCollection {
    pub collection: Collection,
    /// `None` when the document does not exist yet.
    pub version: Option<String>,
}

/// Binds a store to the document path and branch the collection lives at.
pub struct CollectionSync {
    store: Arc<dyn ContentStore>,
    path: String,
    branch: String,
}

impl CollectionSync {
    pub fn new(store: Arc<dyn ContentStore>, path: &str, branch: &str) -> Self {
        CollectionSync {
            store,
            path: path.to_string(),
            branch: branch.to_string(),
        }
    }

    pub async fn load(&self) -> Result<LoadedCollection> {
        let start = Instant::now();
        let fetched = self.store.fetch(&self.path, &self.branch).await;
        histogram!(STORE_FETCH_DURATION, "store" => self.store.name())
            .record(start.elapsed().as_secs_f64());

        match fetched.map_err(UpsertError::ReadFailed)? {
            Some(document) => Ok(LoadedCollection {
                collection: Collection::decode(&document.content),
                version: Some(document.version),
            }),
            None => {
                tracing::info!(
                    path = %self.path,
                    branch = %self.branch,
                    "Recipe document not found, starting a new collection"
                );
                Ok(LoadedCollection {
                    collection: Collection::default(),
                    version: None,
                })
            }
        }
    }

    /// Writes `collection` conditionally on `version`. A rejected write is
    /// returned as is; nothing is retried.
    pub async fn commit(
        &self,
        collection: &Collection,
        version: Option<String>,
        message: String,
    ) -> Result<()> {
        let content = collection
            .encode()
            .map_err(|e| UpsertError::InternalError(e.to_string()))?;

        let request = CommitRequest {
            path: self.path.clone(),
            branch: self.branch.clone(),
            content,
            message,
            version,
        };

        let start = Instant::now();
        let result = self.store.commit(request).await;
        histogram!(STORE_COMMIT_DURATION, "store" => self.store.name())
            .record(start.elapsed().as_secs_f64());

        result.map_err(UpsertError::WriteFailed)
    }
}

/// `Add/update recipe: <name>` for a single record, `Add/update <n> recipes` otherwise.
pub fn commit_message(records: &[RecipeRecord]) -> String {
    match records {
        [record] => format!("Add/update recipe: {}", record.name),
        _ => format!("Add/update {} recipes", records.len()),
    }
}
