//! Error types for connectors and the datasets manager

use fanout_data::DataError;
use std::path::PathBuf;

/// Connector errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// No connector registered under this id
    #[error("unknown connector '{0}'")]
    UnknownConnector(String),

    /// Connector id taken
    #[error("connector '{0}' already registered")]
    DuplicateConnector(String),

    /// Dataset absent and not created
    #[error("dataset '{0}' not found")]
    UnknownDataset(String),

    /// Stored value does not fit the requested type
    #[error("dataset '{dataset}', variable '{name}': {reason}")]
    Decode {
        /// Dataset id
        dataset: String,
        /// Variable name
        name: String,
        /// Mismatch description
        reason: String,
    },

    /// File access failed
    #[error("{}: {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File content is not a `{dataset: {name: value}}` object
    #[error("malformed dataset file {}: {reason}", path.display())]
    Format {
        /// File path
        path: PathBuf,
        /// Parse failure
        reason: String,
    },

    /// Data manager rejected a loaded value
    #[error(transparent)]
    Data(#[from] DataError),

    /// Malformed mapping document
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ConnectorError {
    /// Missing connector or dataset
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownConnector(_) | Self::UnknownDataset(_))
    }

    /// Transient backend failure
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}
