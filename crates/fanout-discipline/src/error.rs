//! Error types for discipline instances

use fanout_data::DataError;
use fanout_namespace::NamespaceError;

use crate::state::InstanceState;

/// Discipline errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DisciplineError {
    /// Namespace resolution failed
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// Data manager rejected a declare, read or write
    #[error(transparent)]
    Data(#[from] DataError),

    /// Malformed template
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Lifecycle violation
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current state
        from: InstanceState,
        /// Requested state
        to: InstanceState,
    },

    /// Behaviour failed
    #[error("execution of {instance} failed: {message}")]
    Execution {
        /// Instance display name
        instance: String,
        /// Error chain rendered as text
        message: String,
    },
}

impl DisciplineError {
    /// Error raised while building or configuring, not while running
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::Namespace(_) => true,
            Self::Data(e) => !e.is_missing(),
            Self::IllegalTransition { .. } | Self::Execution { .. } => false,
        }
    }
}
