//! Resource store boundary.
//!
//! The store is the single source of truth shared by the reconciler, the
//! run reporter and the notification pipeline. Writes are conditional on
//! the `resourceVersion` the caller last read (optimistic concurrency).

pub mod manifests;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::resource::{AnyResource, Layer, Repository, ResourceKind, Run};

pub use manifests::{ManifestError, ManifestLoader};
pub use memory::InMemoryStore;

/// Attempts made by [`modify_layer`] before giving up on conflicts.
const MAX_CONFLICT_RETRIES: u32 = 5;

/// Errors returned by a resource store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ResourceKind, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: ResourceKind, key: String },

    #[error("{kind} {key} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        kind: ResourceKind,
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid resource: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Returns true for a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true for a stale write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A change observed on a watched resource kind.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(AnyResource),
    Modified(AnyResource),
    Deleted(AnyResource),
}

impl WatchEvent {
    /// Returns the resource the event is about.
    pub fn resource(&self) -> &AnyResource {
        match self {
            WatchEvent::Added(r) | WatchEvent::Modified(r) | WatchEvent::Deleted(r) => r,
        }
    }
}

/// Initial listing of a kind plus the events that follow it. No event is
/// lost between the two.
pub struct WatchStream {
    pub initial: Vec<AnyResource>,
    pub events: broadcast::Receiver<WatchEvent>,
}

/// Persistent store for layers, runs and repositories.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_layer(&self, namespace: &str, name: &str) -> Result<Layer>;

    async fn list_layers(&self) -> Result<Vec<Layer>>;

    /// Replaces a layer. Fails with `Conflict` if the layer changed since
    /// `layer.metadata.resource_version` was read.
    async fn update_layer(&self, layer: Layer) -> Result<Layer>;

    async fn get_repository(&self, namespace: &str, name: &str) -> Result<Repository>;

    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    async fn get_run(&self, namespace: &str, name: &str) -> Result<Run>;

    async fn list_runs(&self) -> Result<Vec<Run>>;

    async fn create_run(&self, run: Run) -> Result<Run>;

    /// Replaces a run, conditional on its resource version.
    async fn update_run(&self, run: Run) -> Result<Run>;

    /// Creates or replaces a resource unconditionally, keeping any existing
    /// status.
    async fn apply(&self, resource: AnyResource) -> Result<AnyResource>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()>;

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream>;
}

/// Re-reads and rewrites a layer until the write lands without a conflict.
pub async fn modify_layer<F>(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> Result<Layer>
where
    F: FnMut(&mut Layer) + Send,
{
    let mut attempt = 0;
    loop {
        let mut layer = store.get_layer(namespace, name).await?;
        mutate(&mut layer);
        match store.update_layer(layer).await {
            Err(e) if e.is_conflict() && attempt + 1 < MAX_CONFLICT_RETRIES => {
                attempt += 1;
                log::debug!(
                    "Conflict writing layer {}/{}, retrying (attempt {}/{})",
                    namespace,
                    name,
                    attempt + 1,
                    MAX_CONFLICT_RETRIES
                );
            }
            result => return result,
        }
    }
}

/// Returns the runs of a layer, newest first.
pub async fn runs_for_layer(store: &dyn ResourceStore, layer: &Layer) -> Result<Vec<Run>> {
    let mut runs: Vec<Run> = store
        .list_runs()
        .await?
        .into_iter()
        .filter(|run| run.belongs_to(layer.namespace(), layer.name()))
        .collect();
    runs.sort_by(|a, b| {
        b.metadata
            .creation_timestamp
            .cmp(&a.metadata.creation_timestamp)
            .then_with(|| b.metadata.resource_version.cmp(&a.metadata.resource_version))
    });
    Ok(runs)
}
