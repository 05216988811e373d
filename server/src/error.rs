use thiserror::Error;

/// Failures that stop the server process.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Driftwatch(#[from] driftwatch::DriftwatchError),

    #[error("Failed to initialize logging: {0}")]
    Telemetry(#[from] driftwatch::telemetry::TelemetryError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl From<driftwatch::ConfigError> for ServerError {
    fn from(e: driftwatch::ConfigError) -> Self {
        Self::Driftwatch(e.into())
    }
}

impl From<driftwatch::store::StoreError> for ServerError {
    fn from(e: driftwatch::store::StoreError) -> Self {
        Self::Driftwatch(e.into())
    }
}

impl From<driftwatch::store::ManifestError> for ServerError {
    fn from(e: driftwatch::store::ManifestError) -> Self {
        Self::Driftwatch(e.into())
    }
}

impl From<driftwatch::WatchError> for ServerError {
    fn from(e: driftwatch::WatchError) -> Self {
        Self::Driftwatch(e.into())
    }
}
