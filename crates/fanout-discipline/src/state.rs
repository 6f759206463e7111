//! Discipline instance lifecycle
//!
//! ```text
//! pending -> configured -> ready -> executed -> stale
//!                ^          |  \       |         |
//!                |          |   `-> failed <-----'
//!                `----------+------------ (reset)
//! ```
//!
//! `destroyed` is reachable from every live state and only through scatter
//! reconciliation.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::error::DisciplineError;

/// Lifecycle state of a discipline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Template bound, namespaces not rebased yet
    Pending,
    /// Namespaces rebased, variables declared
    Configured,
    /// Every required input holds a value
    Ready,
    /// Behaviour ran and outputs were written
    Executed,
    /// An input changed after execution
    Stale,
    /// Behaviour raised; kept until the host resets it
    Failed,
    /// Torn down by reconciliation
    Destroyed,
}

impl InstanceState {
    /// May be picked up by the scheduler
    #[inline]
    #[must_use]
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Ready | Self::Stale)
    }

    /// Counts as finished for a gather
    #[inline]
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Executed | Self::Failed)
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Configured => "configured",
            Self::Ready => "ready",
            Self::Executed => "executed",
            Self::Stale => "stale",
            Self::Failed => "failed",
            Self::Destroyed => "destroyed",
        }
    }
}

impl Display for InstanceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: InstanceState) -> Vec<InstanceState> {
    use InstanceState::*;
    match from {
        Pending => vec![Configured, Destroyed],
        Configured => vec![Ready, Destroyed],
        Ready => vec![Executed, Failed, Configured, Destroyed],
        Executed => vec![Stale, Destroyed],
        Stale => vec![Executed, Failed, Configured, Destroyed],
        Failed => vec![Configured, Destroyed],
        Destroyed => vec![],
    }
}

/// Validate a single transition
///
/// # Errors
/// [`DisciplineError::IllegalTransition`] if `to` is not reachable from `from`.
pub fn validate_transition(from: InstanceState, to: InstanceState) -> Result<(), DisciplineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(DisciplineError::IllegalTransition { from, to })
    }
}
