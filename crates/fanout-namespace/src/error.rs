//! Error types for namespace resolution

use crate::path::{NamespaceId, ScopeId};

/// Namespace registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    /// Identifier never registered in the scope chain (or the scope itself
    /// does not exist yet)
    #[error("unknown namespace '{id}' in scope {scope}")]
    Unknown {
        /// Requested identifier
        id: NamespaceId,
        /// Scope the lookup started from
        scope: ScopeId,
    },

    /// Identifier (or its whole scope) has been released
    #[error("stale namespace '{id}' in scope {scope}")]
    Stale {
        /// Requested identifier
        id: NamespaceId,
        /// Scope the lookup started from
        scope: ScopeId,
    },

    /// Malformed path
    #[error("invalid namespace path: '{0}'")]
    InvalidPath(String),

    /// Scope opened twice while still live
    #[error("scope already open: {0}")]
    ScopeAlreadyOpen(ScopeId),
}

impl NamespaceError {
    /// Lookup-time error that means "not resolvable yet" rather than misuse
    #[inline]
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unknown { .. } | Self::Stale { .. })
    }
}
