//! Error types for the sync engine.

use thiserror::Error;

/// Boxed error returned by host-supplied fetch functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Subscription to unknown publication [{0}]")]
    PublicationNotFound(String),

    #[error("Defect: {0}")]
    Defect(String),

    #[error("Data contract violation: {0}")]
    DataContract(String),

    #[error("Fetch failed for publication [{publication}]: {source}")]
    Fetch {
        publication: String,
        #[source]
        source: BoxError,
    },

    #[error("Client sync version [{client}] is incompatible with server version [{server}]")]
    VersionIncompatible { client: String, server: String },

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SyncError {
    /// Stable machine-readable code, suitable for sending back over the wire.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "CONFIG_ERROR",
            SyncError::PublicationNotFound(_) => "NOT_FOUND",
            SyncError::Defect(_) => "DEFECT",
            SyncError::DataContract(_) => "DATA_CONTRACT",
            SyncError::Fetch { .. } => "FETCH_FAILED",
            SyncError::VersionIncompatible { .. } => "VERSION_INCOMPATIBLE",
            SyncError::UnknownRoute(_) => "UNKNOWN_ROUTE",
            SyncError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::InvalidRequest(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
