//! Error types for scatter and gather

use fanout_data::DataError;
use fanout_discipline::DisciplineError;
use fanout_namespace::NamespaceError;

/// Scatter builder and gather errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScatterError {
    /// Namespace resolution failed
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// Data manager rejected an operation
    #[error(transparent)]
    Data(#[from] DataError),

    /// Instance configuration failed
    #[error(transparent)]
    Discipline(#[from] DisciplineError),

    /// Driving list holds the same key twice
    #[error("duplicate scatter key '{key}' in builder {builder}")]
    DuplicateKey {
        /// Builder name
        builder: String,
        /// Repeated key
        key: String,
    },

    /// Malformed build map or driving value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Gathered variable is produced by no discipline of an instance
    #[error("no output '{var}' under instance '{key}'")]
    UnknownOutput {
        /// Requested variable
        var: String,
        /// Instance lacking it
        key: String,
    },

    /// Strict gather over failed instances
    #[error("execution failure gathering '{var}': failed keys {failed_keys:?}")]
    ExecutionFailure {
        /// Requested variable
        var: String,
        /// Keys of failed instances, in driving-list order
        failed_keys: Vec<String>,
    },
}

impl ScatterError {
    /// Error raised by configuration rather than execution
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Self::Namespace(_)
            | Self::DuplicateKey { .. }
            | Self::Configuration(_)
            | Self::UnknownOutput { .. } => true,
            Self::Data(e) => !e.is_missing(),
            Self::Discipline(e) => e.is_configuration_error(),
            Self::ExecutionFailure { .. } => false,
        }
    }
}
