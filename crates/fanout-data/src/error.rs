//! Error types for variable storage

/// Data manager errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    /// Invalid descriptor or declaration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Write (or default) does not match the declared shape
    #[error("type mismatch for {name}: {reason}")]
    TypeMismatch {
        /// Full variable name
        name: String,
        /// First mismatch found
        reason: String,
    },

    /// Access to a name that was never declared (or has been undeclared)
    #[error("undeclared variable: {0}")]
    Undeclared(String),

    /// Declared but no value written yet
    #[error("value not set: {0}")]
    ValueNotSet(String),

    /// Local variable written by another instance
    #[error("visibility violation: {name} is local to another instance")]
    VisibilityViolation {
        /// Full variable name
        name: String,
    },

    /// Same name declared twice with incompatible shapes or owners
    #[error("conflicting declaration of {name}: {reason}")]
    ConflictingDeclaration {
        /// Full variable name
        name: String,
        /// What differs from the stored declaration
        reason: String,
    },
}

impl DataError {
    /// Error raised when a read is attempted before the value is available
    #[inline]
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Undeclared(_) | Self::ValueNotSet(_))
    }
}
