//! K8s-style resource types for the driftwatch controller.
//!
//! Three kinds are reconciled or mirrored:
//! - `Layer`: a repository path + branch to plan and apply
//! - `Run`: one plan or apply attempt against a layer
//! - `Repository`: auto-apply policy and sync windows shared by layers

pub mod layer;
pub mod repository;
pub mod run;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use layer::{
    Condition, ConditionStatus, Layer, LayerRun, LayerSpec, LayerStatus, ManualSyncStatus,
    ResourceRef, MANAGED_BY_LABEL, PULL_REQUEST_OWNER_KIND,
};
pub use repository::{
    auto_apply_enabled, max_retries, OnErrorStrategy, RemediationStrategy, Repository,
    RepositorySpec, SyncWindow, WindowKind,
};
pub use run::{Action, Run, RunSpec, RunState, RunStatus};

/// The API version for all driftwatch resources.
pub const API_VERSION: &str = "driftwatch.io/v1alpha1";

/// Namespace used when a manifest or reference omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Layer,
    Run,
    Repository,
}

impl ResourceKind {
    /// Returns all resource kinds.
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Layer,
            ResourceKind::Run,
            ResourceKind::Repository,
        ]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Layer => write!(f, "Layer"),
            ResourceKind::Run => write!(f, "Run"),
            ResourceKind::Repository => write!(f, "Repository"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "layer" => Ok(ResourceKind::Layer),
            "run" => Ok(ResourceKind::Run),
            "repository" => Ok(ResourceKind::Repository),
            _ => Err(format!("Unknown resource kind: {}", s)),
        }
    }
}

/// Builds the `namespace/name` key used to index resources.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Reference from a dependent object to the object that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

/// Metadata for a resource, following K8s conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// The unique name of the resource within its kind and namespace.
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    /// Assigned by the store on creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Bumped by the store on every write. Writes carrying a stale
    /// version are rejected.
    #[serde(default)]
    pub resource_version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Key-value labels for organizing and selecting resources.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,

    /// Key-value annotations, used as single-shot signals and cached facts.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with a namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Adds a label to the metadata.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an annotation to the metadata.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Returns the `namespace/name` key.
    pub fn key(&self) -> String {
        object_key(&self.namespace, &self.name)
    }
}

/// A generic K8s-style resource wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<S, T = ()> {
    /// API version, should always be `driftwatch.io/v1alpha1`.
    pub api_version: String,

    pub kind: ResourceKind,

    pub metadata: ObjectMeta,

    pub spec: S,

    /// Observed state, written by the controller.
    #[serde(default)]
    pub status: T,
}

impl<S, T: Default> Resource<S, T> {
    /// Creates a new resource with the given kind and spec.
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: S,
    ) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind,
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: T::default(),
        }
    }
}

impl<S, T> Resource<S, T> {
    /// Returns the name of the resource.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the namespace of the resource.
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Returns the `namespace/name` key.
    pub fn key(&self) -> String {
        self.metadata.key()
    }

    /// Returns an annotation value, if set.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.get(key).map(String::as_str)
    }
}

/// A resource that can be stored, listed and watched.
pub trait StoreObject: Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn into_any(self) -> AnyResource;

    fn from_any(resource: AnyResource) -> Option<Self>;
}

impl StoreObject for Layer {
    const KIND: ResourceKind = ResourceKind::Layer;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn into_any(self) -> AnyResource {
        AnyResource::Layer(self)
    }

    fn from_any(resource: AnyResource) -> Option<Self> {
        match resource {
            AnyResource::Layer(layer) => Some(layer),
            _ => None,
        }
    }
}

impl StoreObject for Run {
    const KIND: ResourceKind = ResourceKind::Run;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn into_any(self) -> AnyResource {
        AnyResource::Run(self)
    }

    fn from_any(resource: AnyResource) -> Option<Self> {
        match resource {
            AnyResource::Run(run) => Some(run),
            _ => None,
        }
    }
}

impl StoreObject for Repository {
    const KIND: ResourceKind = ResourceKind::Repository;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn into_any(self) -> AnyResource {
        AnyResource::Repository(self)
    }

    fn from_any(resource: AnyResource) -> Option<Self> {
        match resource {
            AnyResource::Repository(repository) => Some(repository),
            _ => None,
        }
    }
}

// ============================================================================
// Any Resource (for generic handling)
// ============================================================================

/// A resource that can be any of the supported types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
pub enum AnyResource {
    Layer(Layer),
    Run(Run),
    Repository(Repository),
}

impl AnyResource {
    /// Returns the kind of this resource.
    pub fn kind(&self) -> ResourceKind {
        match self {
            AnyResource::Layer(_) => ResourceKind::Layer,
            AnyResource::Run(_) => ResourceKind::Run,
            AnyResource::Repository(_) => ResourceKind::Repository,
        }
    }

    /// Returns the metadata of this resource.
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            AnyResource::Layer(r) => &r.metadata,
            AnyResource::Run(r) => &r.metadata,
            AnyResource::Repository(r) => &r.metadata,
        }
    }

    /// Returns the metadata for modification.
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            AnyResource::Layer(r) => &mut r.metadata,
            AnyResource::Run(r) => &mut r.metadata,
            AnyResource::Repository(r) => &mut r.metadata,
        }
    }

    /// Returns the API version of this resource.
    pub fn api_version(&self) -> &str {
        match self {
            AnyResource::Layer(r) => &r.api_version,
            AnyResource::Run(r) => &r.api_version,
            AnyResource::Repository(r) => &r.api_version,
        }
    }

    /// Returns the `namespace/name` key.
    pub fn key(&self) -> String {
        self.metadata().key()
    }

    /// Copies the status of `existing` into this resource. Used by upserts
    /// so that re-applying a manifest keeps the observed state.
    pub fn keep_status_of(&mut self, existing: &AnyResource) {
        match (self, existing) {
            (AnyResource::Layer(new), AnyResource::Layer(old)) => new.status = old.status.clone(),
            (AnyResource::Run(new), AnyResource::Run(old)) => new.status = old.status.clone(),
            _ => {}
        }
    }
}

/// Intermediate struct for parsing resources before determining their type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHeader {
    pub api_version: String,
    pub kind: ResourceKind,
    pub metadata: ObjectMeta,
}

/// A resource along with the manifest file it was loaded from.
#[derive(Debug, Clone)]
pub struct ResourceWithPath<T> {
    pub resource: T,
    /// The file path relative to the manifests directory.
    pub path: std::path::PathBuf,
}

impl<T> ResourceWithPath<T> {
    /// Pairs a resource with the file it came from.
    pub fn new(resource: T, path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            resource,
            path: path.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
