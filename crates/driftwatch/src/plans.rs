//! Retrieval of plan output written by runners.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanStoreError {
    #[error("Failed to read plan {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write plan {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid plan path segment '{segment}'")]
    InvalidSegment { segment: String },

    #[error("Unknown plan format '{0}', expected pretty, json or short")]
    UnknownFormat(String),
}

/// Rendering of a stored plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanFormat {
    #[default]
    Pretty,
    Json,
    Short,
}

impl PlanFormat {
    /// File extension of plans in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            PlanFormat::Pretty => "pretty",
            PlanFormat::Json => "json",
            PlanFormat::Short => "short",
        }
    }

    /// Content type served for this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            PlanFormat::Json => "application/json",
            PlanFormat::Pretty | PlanFormat::Short => "text/plain; charset=utf-8",
        }
    }
}

impl FromStr for PlanFormat {
    type Err = PlanStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "pretty" => Ok(PlanFormat::Pretty),
            "json" => Ok(PlanFormat::Json),
            "short" => Ok(PlanFormat::Short),
            other => Err(PlanStoreError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for PlanFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Identifies one attempt of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanKey<'a> {
    pub namespace: &'a str,
    pub layer: &'a str,
    pub run: &'a str,
    pub attempt: &'a str,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Returns the plan bytes, or `None` when nothing was stored.
    async fn get_plan(
        &self,
        key: &PlanKey<'_>,
        format: PlanFormat,
    ) -> Result<Option<Vec<u8>>, PlanStoreError>;
}

/// Plans laid out as `<root>/<namespace>/<layer>/<run>/<attempt>/plan.<format>`.
pub struct FsPlanStore {
    root: PathBuf,
}

impl FsPlanStore {
    /// Creates a plan store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves the file holding a plan. Segments must be plain names.
    pub fn plan_path(
        &self,
        key: &PlanKey<'_>,
        format: PlanFormat,
    ) -> Result<PathBuf, PlanStoreError> {
        let mut path = self.root.clone();
        for segment in [key.namespace, key.layer, key.run, key.attempt] {
            check_segment(segment)?;
            path.push(segment);
        }
        path.push(format!("plan.{}", format.extension()));
        Ok(path)
    }

    /// Stores plan output, creating the attempt directory as needed.
    pub async fn put_plan(
        &self,
        key: &PlanKey<'_>,
        format: PlanFormat,
        content: &[u8],
    ) -> Result<PathBuf, PlanStoreError> {
        let path = self.plan_path(key, format)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PlanStoreError::Write {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| PlanStoreError::Write {
                path: path.clone(),
                source: e,
            })?;
        log::debug!("Stored plan {:?}", path);
        Ok(path)
    }
}

#[async_trait]
impl PlanStore for FsPlanStore {
    async fn get_plan(
        &self,
        key: &PlanKey<'_>,
        format: PlanFormat,
    ) -> Result<Option<Vec<u8>>, PlanStoreError> {
        let path = self.plan_path(key, format)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No plan at {:?}", path);
                Ok(None)
            }
            Err(e) => Err(PlanStoreError::Read { path, source: e }),
        }
    }
}

fn check_segment(segment: &str) -> Result<(), PlanStoreError> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !segment.contains(['/', '\\']) => Ok(()),
        _ => Err(PlanStoreError::InvalidSegment {
            segment: segment.to_string(),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
