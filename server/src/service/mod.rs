//! File CRUD on top of a revisioned [`Store`].
//!
//! Each file is one JSON document stored under `<path>:raw`. The suffix keeps
//! room for derived documents next to the raw one, and listings only pick up
//! `:raw` keys.

mod error;

#[cfg(test)]
mod tests;

pub use error::{ServiceError, ServiceResult};

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shared_types::File;
use store::{Revision, Store, normalize_key};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const RAW_SUFFIX: &str = ":raw";

/// Persisted form of a file; the revision comes from the store.
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    path: String,
    #[serde(default)]
    contents: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

fn raw_key(path: &str) -> String {
    format!("{}{RAW_SUFFIX}", normalize_key(path))
}

fn decode(key: &str, value: &[u8], revision: Revision) -> ServiceResult<File> {
    let document: Document =
        serde_json::from_slice(value).map_err(|source| ServiceError::Encoding {
            key: key.to_string(),
            source,
        })?;
    Ok(File {
        path: document.path,
        contents: document.contents,
        metadata: document.metadata,
        revision,
    })
}

pub struct FileService {
    store: Box<dyn Store>,
}

impl FileService {
    pub fn new(store: Box<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub async fn get_file(&self, ctx: &CancellationToken, path: &str) -> ServiceResult<File> {
        let key = raw_key(path);
        let (value, revision) = self.store.get(ctx, &key).await.map_err(|err| {
            if err.is_not_found() {
                ServiceError::NotFound {
                    path: normalize_key(path),
                }
            } else {
                err.into()
            }
        })?;
        decode(&key, &value, revision)
    }

    /// Every file under `prefix`, ordered by path, plus the revision they
    /// were read at.
    pub async fn list_files(
        &self,
        ctx: &CancellationToken,
        prefix: &str,
    ) -> ServiceResult<(Vec<File>, Revision)> {
        let (entries, revision) = self.store.list(ctx, prefix).await?;
        let files = entries
            .iter()
            .filter(|(key, _)| key.ends_with(RAW_SUFFIX))
            .map(|(key, value)| decode(key, value, revision))
            .collect::<ServiceResult<Vec<_>>>()?;
        debug!(prefix, count = files.len(), revision, "listed files");
        Ok((files, revision))
    }

    /// Create a file that must not exist yet.
    pub async fn create_file(
        &self,
        ctx: &CancellationToken,
        path: &str,
        contents: String,
        metadata: BTreeMap<String, String>,
    ) -> ServiceResult<File> {
        match self.get_file(ctx, path).await {
            Ok(_) => {
                return Err(ServiceError::AlreadyExists {
                    path: normalize_key(path),
                });
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }
        let file = self.write(ctx, path, contents, metadata, None).await?;
        info!(path = %file.path, revision = file.revision, "created file");
        Ok(file)
    }

    /// Replace an existing file.
    ///
    /// With `expected_revision`, the write only goes through if the store has
    /// not moved past that revision since the caller read the file.
    pub async fn update_file(
        &self,
        ctx: &CancellationToken,
        path: &str,
        contents: String,
        metadata: BTreeMap<String, String>,
        expected_revision: Option<Revision>,
    ) -> ServiceResult<File> {
        self.get_file(ctx, path).await?;
        let file = self
            .write(ctx, path, contents, metadata, expected_revision)
            .await?;
        info!(path = %file.path, revision = file.revision, "updated file");
        Ok(file)
    }

    /// Remove a file. Removing a missing file succeeds.
    pub async fn delete_file(&self, ctx: &CancellationToken, path: &str) -> ServiceResult<Revision> {
        let revision = self.store.delete(ctx, &raw_key(path)).await?;
        info!(path = %normalize_key(path), revision, "deleted file");
        Ok(revision)
    }

    pub async fn close(&self) -> ServiceResult<()> {
        self.store.close().await?;
        Ok(())
    }

    async fn write(
        &self,
        ctx: &CancellationToken,
        path: &str,
        contents: String,
        metadata: BTreeMap<String, String>,
        expected_revision: Option<Revision>,
    ) -> ServiceResult<File> {
        let key = raw_key(path);
        let document = Document {
            path: normalize_key(path),
            contents,
            metadata,
        };
        let value = serde_json::to_vec(&document).map_err(|source| ServiceError::Encoding {
            key: key.clone(),
            source,
        })?;
        let revision = self
            .store
            .set(ctx, &key, Bytes::from(value), expected_revision)
            .await?;
        Ok(File {
            path: document.path,
            contents: document.contents,
            metadata: document.metadata,
            revision,
        })
    }
}
