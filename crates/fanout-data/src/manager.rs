//! Data Manager
//!
//! Process-lifetime store of `(namespace path, name) -> entry`.
//!
//! - **declare**: reference-counted; identical redeclaration is shared
//! - **write**: shape-checked, visibility-checked, bumps the revision
//! - **read**: fails on undeclared or unset entries
//! - **undeclare**: removes the entry when its last declarer leaves
//!
//! The manager does not order concurrent writers to the same shared entry;
//! the execution schedule does.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fanout_namespace::NamespacePath;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};
use ulid::Ulid;

use crate::descriptor::{VariableSpec, Visibility};
use crate::error::DataError;
use crate::value::Value;

/// Identity of a discipline instance as seen by the data manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(Ulid);

impl OwnerId {
    /// Fresh unique owner
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Party performing a declare or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Writer {
    /// Hosting process (configuration, datasets, builders)
    Host,
    /// A discipline instance
    Owner(OwnerId),
}

/// Address of a variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableKey {
    /// Resolved namespace path
    pub namespace: NamespacePath,
    /// Short name
    pub name: String,
}

impl VariableKey {
    /// Create a key
    #[must_use]
    pub fn new(namespace: NamespacePath, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    /// `<namespace path>.<name>`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

impl Display for VariableKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// Stored variable
#[derive(Debug, Clone, PartialEq)]
pub struct VariableEntry {
    /// Address
    pub key: VariableKey,
    /// Declared shape, unit and visibility
    pub spec: VariableSpec,
    /// First declarer; only it may write a local entry
    pub owner: Writer,
    /// Number of live declarations
    pub refcount: usize,
    /// Current value
    pub value: Option<Value>,
    /// Revision of the last write (0 = never written)
    pub revision: u64,
}

impl VariableEntry {
    /// Entry holds a value
    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    fn may_write(&self, writer: Writer) -> bool {
        self.spec.visibility == Visibility::Shared || writer == Writer::Host || writer == self.owner
    }
}

/// Single authoritative variable store
#[derive(Debug, Default)]
pub struct DataManager {
    entries: DashMap<VariableKey, VariableEntry>,
    revision: AtomicU64,
}

impl DataManager {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Declare a variable, returning its live declaration count
    ///
    /// A spec default is written when the entry has no value yet.
    ///
    /// # Errors
    /// [`DataError::ConflictingDeclaration`] when the key already exists with
    /// another shape, another visibility, or (for local entries) another owner.
    pub fn declare(
        &self,
        key: VariableKey,
        spec: &VariableSpec,
        declarer: Writer,
    ) -> Result<usize, DataError> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let conflict = |reason: String| DataError::ConflictingDeclaration {
                    name: entry.key.full_name(),
                    reason,
                };
                if entry.spec.type_spec != spec.type_spec {
                    return Err(conflict(format!(
                        "declared {}, requested {}",
                        entry.spec.type_tag(),
                        spec.type_tag()
                    )));
                }
                if entry.spec.visibility != spec.visibility {
                    return Err(conflict(format!(
                        "declared {:?}, requested {:?}",
                        entry.spec.visibility, spec.visibility
                    )));
                }
                if spec.visibility == Visibility::Local && entry.owner != declarer {
                    return Err(conflict("local to another instance".to_string()));
                }
                if entry.spec.unit.is_none() {
                    entry.spec.unit.clone_from(&spec.unit);
                }
                if entry.value.is_none() {
                    if let Some(default) = &spec.default {
                        entry.value = Some(default.clone());
                        entry.revision = self.next_revision();
                    }
                }
                entry.refcount += 1;
                trace!("Redeclared {} (refcount {})", entry.key, entry.refcount);
                Ok(entry.refcount)
            }
            Entry::Vacant(vacant) => {
                let (value, revision) = match &spec.default {
                    Some(default) => (Some(default.clone()), self.next_revision()),
                    None => (None, 0),
                };
                debug!("Declared {} as {}", vacant.key(), spec.type_tag());
                let key = vacant.key().clone();
                vacant.insert(VariableEntry {
                    key,
                    spec: spec.clone(),
                    owner: declarer,
                    refcount: 1,
                    value,
                    revision,
                });
                Ok(1)
            }
        }
    }

    /// Drop one declaration; returns `true` when the entry was removed
    ///
    /// # Errors
    /// [`DataError::Undeclared`] if the key is not declared.
    pub fn undeclare(&self, key: &VariableKey) -> Result<bool, DataError> {
        let removed = self
            .entries
            .remove_if_mut(key, |_, entry| {
                entry.refcount = entry.refcount.saturating_sub(1);
                entry.refcount == 0
            })
            .is_some();
        if removed {
            debug!("Undeclared {}", key);
            return Ok(true);
        }
        if self.entries.contains_key(key) {
            Ok(false)
        } else {
            Err(DataError::Undeclared(key.full_name()))
        }
    }

    /// Write a value, returning the new revision
    ///
    /// # Errors
    /// - [`DataError::Undeclared`] if the key is not declared
    /// - [`DataError::VisibilityViolation`] for a local entry owned by someone else
    /// - [`DataError::TypeMismatch`] if the value does not fit the declared shape;
    ///   the stored value is left unchanged
    pub fn write(&self, key: &VariableKey, value: Value, writer: Writer) -> Result<u64, DataError> {
        let mut entry = self
            .entries
            .get_mut(key)
            .ok_or_else(|| DataError::Undeclared(key.full_name()))?;
        if !entry.may_write(writer) {
            return Err(DataError::VisibilityViolation {
                name: key.full_name(),
            });
        }
        entry
            .spec
            .type_spec
            .check(&value)
            .map_err(|reason| DataError::TypeMismatch {
                name: key.full_name(),
                reason,
            })?;
        entry.value = Some(value);
        entry.revision = self.next_revision();
        trace!("Wrote {} (revision {})", key, entry.revision);
        Ok(entry.revision)
    }

    /// Current value
    ///
    /// # Errors
    /// [`DataError::Undeclared`] or [`DataError::ValueNotSet`].
    pub fn read(&self, key: &VariableKey) -> Result<Value, DataError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| DataError::Undeclared(key.full_name()))?;
        entry
            .value
            .clone()
            .ok_or_else(|| DataError::ValueNotSet(key.full_name()))
    }

    /// Current value if declared and set
    #[must_use]
    pub fn try_read(&self, key: &VariableKey) -> Option<Value> {
        self.entries.get(key).and_then(|e| e.value.clone())
    }

    /// Snapshot of one entry
    #[must_use]
    pub fn entry(&self, key: &VariableKey) -> Option<VariableEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Revision of the last write, `None` if undeclared
    #[must_use]
    pub fn revision(&self, key: &VariableKey) -> Option<u64> {
        self.entries.get(key).map(|e| e.revision)
    }

    /// Key is declared
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &VariableKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of declared entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries declared
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose namespace is `path` or below it, sorted by key
    #[must_use]
    pub fn entries_under(&self, path: &NamespacePath) -> Vec<VariableEntry> {
        let mut found: Vec<VariableEntry> = self
            .entries
            .iter()
            .filter(|e| path.contains(&e.key().namespace))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    /// Entries declared directly in `path`, sorted by name
    #[must_use]
    pub fn entries_in(&self, path: &NamespacePath) -> Vec<VariableEntry> {
        let mut found: Vec<VariableEntry> = self
            .entries
            .iter()
            .filter(|e| e.key().namespace == *path)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.key.name.cmp(&b.key.name));
        found
    }
}
