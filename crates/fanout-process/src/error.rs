//! Error types for process composition and execution

use fanout_data::DataError;
use fanout_discipline::DisciplineError;
use fanout_namespace::NamespaceError;
use fanout_scatter::ScatterError;

/// Process errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// Namespace resolution failed
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// Data manager rejected an operation
    #[error(transparent)]
    Data(#[from] DataError),

    /// Discipline lifecycle error
    #[error(transparent)]
    Discipline(#[from] DisciplineError),

    /// Scatter or gather error
    #[error(transparent)]
    Scatter(#[from] ScatterError),

    /// Malformed engine or process configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No node with that name
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// A discipline behaviour failed
    #[error("execution failure in {instance}: {message}")]
    ExecutionFailure {
        /// Instance display name (`key/template`)
        instance: String,
        /// Behaviour error
        message: String,
    },

    /// Execution did not settle within the configured number of rounds
    #[error("execution did not settle after {0} rounds")]
    RoundLimit(usize),
}

impl ProcessError {
    /// Error raised by configuration rather than execution
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Self::Namespace(_) | Self::Configuration(_) | Self::UnknownNode(_) => true,
            Self::Data(e) => !e.is_missing(),
            Self::Discipline(e) => e.is_configuration_error(),
            Self::Scatter(e) => e.is_configuration_error(),
            Self::ExecutionFailure { .. } | Self::RoundLimit(_) => false,
        }
    }

    /// Worth calling again once more data is available
    ///
    /// Missing values and namespaces not yet rebased by an outer builder
    /// resolve themselves on a later configure pass.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Namespace(e) => e.is_unresolved(),
            Self::Data(e) => e.is_missing(),
            Self::Scatter(ScatterError::Namespace(e)) => e.is_unresolved(),
            Self::Scatter(ScatterError::Data(e)) => e.is_missing(),
            _ => false,
        }
    }
}
