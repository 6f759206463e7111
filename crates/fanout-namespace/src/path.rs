//! Namespace identifiers, resolved paths and scope identifiers
//!
//! Provides [`NamespaceId`] (symbolic name such as `ns_ac`), [`NamespacePath`]
//! (resolved dotted path such as `Study.multi_scenarios.scenario_1`) and
//! [`ScopeId`] (the context a binding lives in).

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::NamespaceError;

/// Symbolic namespace identifier
///
/// Disciplines and build maps refer to namespaces by identifier only; the
/// concrete path is looked up in a [`crate::NamespaceRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Create new identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NamespaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NamespaceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NamespaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Resolved namespace path
///
/// # Structure
/// Ordered, non-empty segments. Displayed and parsed in dotted form:
/// `Study.multi_scenarios.scenario_1`.
///
/// # Example
/// ```
/// use fanout_namespace::NamespacePath;
///
/// let root: NamespacePath = "Study.driver".parse().unwrap();
/// let child = root.child("scenario_1");
/// assert_eq!(child.to_string(), "Study.driver.scenario_1");
/// assert!(root.is_ancestor_of(&child));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespacePath {
    segments: Vec<String>,
}

impl NamespacePath {
    /// Create from segments
    ///
    /// # Errors
    /// Returns [`NamespaceError::InvalidPath`] if there are no segments or a
    /// segment is empty or contains a dot.
    pub fn new(segments: Vec<String>) -> Result<Self, NamespaceError> {
        if segments.is_empty() {
            return Err(NamespaceError::InvalidPath(String::new()));
        }
        if let Some(bad) = segments.iter().find(|s| s.is_empty() || s.contains('.')) {
            return Err(NamespaceError::InvalidPath(bad.clone()));
        }
        Ok(Self { segments })
    }

    /// Single-segment path
    ///
    /// # Errors
    /// Same rules as [`NamespacePath::new`].
    #[inline]
    pub fn single(segment: impl Into<String>) -> Result<Self, NamespaceError> {
        Self::new(vec![segment.into()])
    }

    /// Path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment
    #[inline]
    #[must_use]
    pub fn last(&self) -> &str {
        // segments is never empty
        self.segments.last().map_or("", String::as_str)
    }

    /// Append one segment
    ///
    /// Dots inside `segment` are split into separate segments so that
    /// `child("a.b")` equals `child("a").child("b")`.
    #[must_use]
    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(
            segment
                .as_ref()
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        Self { segments }
    }

    /// Append several segments
    #[must_use]
    pub fn extend(&self, segments: &[impl AsRef<str>]) -> Self {
        segments.iter().fold(self.clone(), |acc, s| acc.child(s))
    }

    /// Parent path (None at depth 1)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            None
        } else {
            Some(Self {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    /// Strictly shorter prefix of `other`
    #[must_use]
    pub fn is_ancestor_of(&self, other: &NamespacePath) -> bool {
        self.segments.len() < other.segments.len()
            && self.segments == other.segments[..self.segments.len()]
    }

    /// Equal to `other` or an ancestor of it
    #[inline]
    #[must_use]
    pub fn contains(&self, other: &NamespacePath) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Segments of `self` below `prefix`, if `prefix` contains `self`
    #[must_use]
    pub fn strip_prefix(&self, prefix: &NamespacePath) -> Option<&[String]> {
        if prefix.contains(self) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }
}

impl Display for NamespacePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl FromStr for NamespacePath {
    type Err = NamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NamespaceError::InvalidPath(s.to_string()));
        }
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        Self::new(segments).map_err(|_| NamespaceError::InvalidPath(s.to_string()))
    }
}

impl TryFrom<String> for NamespacePath {
    type Error = NamespaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NamespacePath> for String {
    fn from(value: NamespacePath) -> Self {
        value.to_string()
    }
}

/// Rebase `current` under `parent` with an instance `suffix`
///
/// Pure function of its arguments:
/// - `current` inside `parent`: the suffix is inserted right after `parent`
///   (`A.B.Disc3` under `A.B` with `s1` becomes `A.B.s1.Disc3`).
/// - `current` outside `parent`: the whole of `current` is moved below
///   `parent.suffix` so two suffixes can never collide.
#[must_use]
pub fn rebase_path(current: &NamespacePath, parent: &NamespacePath, suffix: &str) -> NamespacePath {
    let base = parent.child(suffix);
    match current.strip_prefix(parent) {
        Some(rest) => base.extend(rest),
        None => base.extend(current.segments()),
    }
}

/// Identifier of a binding context
///
/// The root scope has no segments. Scatter builders open one scope per
/// instance key below their own scope, so scope ids mirror the nesting of
/// the process (`driver/scenario_1/inner/x1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ScopeId(Vec<String>);

impl ScopeId {
    /// Root scope
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Child scope
    #[inline]
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// True for the root scope
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Enclosing scope (None for root)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// True if `self` is `other` or encloses it
    #[must_use]
    pub fn encloses(&self, other: &ScopeId) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Scope segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0.join("/"))
        }
    }
}
