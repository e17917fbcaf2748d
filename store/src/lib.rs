//! Revisioned key-value storage behind a single `Store` contract.
//!
//! Every backend shares one definition of revision, conflict and change order:
//! - a store-wide revision counter advanced by every successful `set`/`delete`
//! - optimistic writes checked against that global counter, not per key
//! - prefix listing with a `/`-terminated comparison boundary
//! - ordered watch streams with an explicit termination outcome
//!
//! Backends are resolved from connection strings through [`Registrar`].

pub mod config;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod error;
pub mod memory;
pub mod registry;
pub mod watch;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use config::StoreOptions;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use registry::{default_registrar, Builder, RegisterFn, Registrar};
pub use watch::WatchStream;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;

/// Position in the store-wide mutation history.
pub type Revision = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Put,
    Delete,
}

/// A committed mutation observed by a watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    pub key: String,
    /// Empty for deletes.
    pub value: Bytes,
    pub previous_value: Option<Bytes>,
    pub revision: Revision,
}

impl Event {
    pub fn put(
        key: impl Into<String>,
        value: Bytes,
        previous_value: Option<Bytes>,
        revision: Revision,
    ) -> Self {
        Self {
            event_type: EventType::Put,
            key: key.into(),
            value,
            previous_value,
            revision,
        }
    }

    pub fn delete(key: impl Into<String>, previous_value: Option<Bytes>, revision: Revision) -> Self {
        Self {
            event_type: EventType::Delete,
            key: key.into(),
            value: Bytes::new(),
            previous_value,
            revision,
        }
    }
}

#[async_trait]
pub trait Store: fmt::Display + Send + Sync {
    /// Read a single key together with the store's current revision.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the key is absent.
    async fn get(&self, ctx: &CancellationToken, key: &str) -> Result<(Bytes, Revision)>;

    /// Read every live key under `prefix`.
    ///
    /// The prefix is compared as if it ended with `/`, so `/a/b` matches
    /// `/a/b/c` but not `/a/bc`. No match yields an empty map.
    async fn list(
        &self,
        ctx: &CancellationToken,
        prefix: &str,
    ) -> Result<(BTreeMap<String, Bytes>, Revision)>;

    /// Write a value with optimistic concurrency control.
    ///
    /// # Arguments
    /// * `expected_revision`:
    ///   - `None` (or a negative revision): unconditional, last writer wins
    ///   - `Some(rev)`: succeeds only while the store-wide revision is still `rev`
    ///     or lower; a write to any other key also invalidates `rev`
    ///
    /// # Errors
    /// Returns `StoreError::RevisionMismatch` carrying the actual revision when
    /// the store has moved past `expected_revision`. Nothing is written.
    async fn set(
        &self,
        ctx: &CancellationToken,
        key: &str,
        value: Bytes,
        expected_revision: Option<Revision>,
    ) -> Result<Revision>;

    /// Delete a key. Deleting an absent key succeeds and still advances the
    /// revision.
    async fn delete(&self, ctx: &CancellationToken, key: &str) -> Result<Revision>;

    /// Subscribe to mutations under `prefix` starting at `from_revision`
    /// (inclusive); `0` means from now.
    ///
    /// The stream ends when `ctx` is cancelled, when the stream is dropped, when
    /// the store is closed, or on a backend failure. Use
    /// [`WatchStream::termination`] to tell these apart.
    async fn watch(
        &self,
        ctx: &CancellationToken,
        prefix: &str,
        from_revision: Revision,
    ) -> Result<WatchStream>;

    /// Release the backend. Every later call fails with `StoreError::Closed`.
    async fn close(&self) -> Result<()>;
}

/// Force a leading `/`; backends have no implicit root.
pub fn normalize_key(key: &str) -> String {
    if key.starts_with('/') {
        key.to_string()
    } else {
        format!("/{key}")
    }
}

/// Normalized prefix with a trailing `/` used for list and watch matching.
pub fn prefix_boundary(prefix: &str) -> String {
    let mut prefix = normalize_key(prefix);
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

/// Race `fut` against cancellation of `ctx`, preferring cancellation.
pub(crate) async fn cancellable<T, F>(ctx: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = ctx.cancelled() => Err(StoreError::Cancelled),
        result = fut => result,
    }
}
