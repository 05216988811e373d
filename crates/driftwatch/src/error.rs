use std::path::PathBuf;
use thiserror::Error;

use crate::resource::ResourceKind;

#[derive(Error, Debug)]
pub enum DriftwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] crate::store::ManifestError),

    #[error("Plan store error: {0}")]
    Plans(#[from] crate::plans::PlanStoreError),

    #[error("Run report error: {0}")]
    RunReport(#[from] crate::controller::RunReportError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Initial sync of watched resources did not complete within {secs}s")]
    InitialSyncTimeout { secs: u64 },

    #[error("Watch stream for {kind} closed")]
    StoreClosed { kind: ResourceKind },

    #[error("Failed to watch resources: {0}")]
    Store(#[from] crate::store::StoreError),
}

pub type Result<T> = std::result::Result<T, DriftwatchError>;
