//! Loads resource manifests from a directory of YAML files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

use super::{ResourceStore, StoreError};
use crate::controller::sync_window::validate_window;
use crate::resource::{
    AnyResource, Layer, Repository, ResourceHeader, ResourceKind, ResourceWithPath, Run,
    API_VERSION, DEFAULT_NAMESPACE,
};

/// Errors raised while loading manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifests directory not found: {0}")]
    DirNotFound(PathBuf),

    #[error("Failed to read manifests directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Invalid API version '{version}' in '{path}', expected '{expected}'")]
    InvalidApiVersion {
        path: PathBuf,
        version: String,
        expected: String,
    },

    #[error("Invalid sync window {index} of {resource} in '{path}': {reason}")]
    InvalidSyncWindow {
        path: PathBuf,
        resource: String,
        index: usize,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ManifestError>;

/// Reads `Layer`, `Repository` and `Run` manifests. A file may hold several
/// documents separated by `---`.
pub struct ManifestLoader {
    dir: PathBuf,
}

impl ManifestLoader {
    /// Creates a loader reading manifests below `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the manifests directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Loads every manifest below the directory, sorted by file path.
    pub fn load(&self) -> Result<Vec<ResourceWithPath<AnyResource>>> {
        if !self.dir.is_dir() {
            return Err(ManifestError::DirNotFound(self.dir.clone()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).follow_links(true) {
            let entry = entry.map_err(|e| ManifestError::ReadDirectory {
                path: self.dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let relative = path.strip_prefix(&self.dir).unwrap_or(path);
            // Skip hidden files and anything under a hidden directory
            let hidden = relative.components().any(|c| {
                c.as_os_str()
                    .to_str()
                    .is_some_and(|s| s.starts_with('.'))
            });
            if hidden {
                continue;
            }

            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if ext == "yaml" || ext == "yml" {
                files.push(path.to_path_buf());
            }
        }
        files.sort();

        let mut resources = Vec::new();
        for path in files {
            let relative = path.strip_prefix(&self.dir).unwrap_or(&path).to_path_buf();
            for resource in self.load_file(&path)? {
                resources.push(ResourceWithPath::new(resource, relative.clone()));
            }
        }
        Ok(resources)
    }

    /// Loads all documents of a single file.
    pub fn load_file(&self, path: &Path) -> Result<Vec<AnyResource>> {
        let content = fs::read_to_string(path).map_err(|e| ManifestError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        parse_manifests(&content, path)
    }

    /// Loads the directory and applies every resource to `store`. Returns
    /// the number of resources applied.
    pub async fn apply_to(&self, store: &dyn ResourceStore) -> Result<usize> {
        let resources = self.load()?;
        let count = resources.len();
        for entry in resources {
            log::debug!(
                "Applying {} {} from {}",
                entry.resource.kind(),
                entry.resource.key(),
                entry.path.display()
            );
            store.apply(entry.resource).await?;
        }
        log::info!(
            "Applied {} manifests from {}",
            count,
            self.dir.display()
        );
        Ok(count)
    }
}

/// Parses every document in `content`. Empty documents are skipped.
pub fn parse_manifests(content: &str, path: &Path) -> Result<Vec<AnyResource>> {
    let parse_error = |e: serde_yaml::Error| ManifestError::ParseYaml {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(parse_error)?;
        if value.is_null() {
            continue;
        }

        // Parse the header first to learn the kind
        let header: ResourceHeader =
            serde_yaml::from_value(value.clone()).map_err(parse_error)?;
        if header.api_version != API_VERSION {
            return Err(ManifestError::InvalidApiVersion {
                path: path.to_path_buf(),
                version: header.api_version,
                expected: API_VERSION.to_string(),
            });
        }

        let mut resource = match header.kind {
            ResourceKind::Layer => AnyResource::Layer(typed::<Layer>(value).map_err(parse_error)?),
            ResourceKind::Repository => {
                AnyResource::Repository(typed::<Repository>(value).map_err(parse_error)?)
            }
            ResourceKind::Run => AnyResource::Run(typed::<Run>(value).map_err(parse_error)?),
        };

        let meta = resource.metadata_mut();
        if meta.namespace.is_empty() {
            meta.namespace = DEFAULT_NAMESPACE.to_string();
        }
        if let AnyResource::Repository(repository) = &resource {
            validate_sync_windows(repository, path)?;
        }
        resources.push(resource);
    }
    Ok(resources)
}

fn validate_sync_windows(repository: &Repository, path: &Path) -> Result<()> {
    for (index, window) in repository.spec.sync_windows.iter().enumerate() {
        validate_window(window).map_err(|reason| ManifestError::InvalidSyncWindow {
            path: path.to_path_buf(),
            resource: repository.key(),
            index,
            reason,
        })?;
    }
    Ok(())
}

fn typed<T: DeserializeOwned>(value: serde_yaml::Value) -> serde_yaml::Result<T> {
    serde_yaml::from_value(value)
}
