//! Namespace registry with scope chains
//!
//! Provides [`NamespaceRegistry`], the single place symbolic namespace
//! identifiers are turned into concrete paths.
//!
//! # Scopes
//! Bindings live in scopes. A lookup starts in the requested scope and walks
//! up to the root, so an instance scope sees its own rebased bindings first
//! and falls back to the shared ones. Rebasing only ever writes into the
//! instance scope; bindings of other scopes are never mutated.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::NamespaceError;
use crate::path::{rebase_path, NamespaceId, NamespacePath, ScopeId};

/// Resolved namespace record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Symbolic identifier
    pub id: NamespaceId,
    /// Resolved path
    pub path: NamespacePath,
    /// Path this namespace was rebased under, if any
    pub parent: Option<NamespacePath>,
    /// Scope holding the binding
    pub scope: ScopeId,
}

#[derive(Debug, Clone)]
enum Binding {
    Live(Namespace),
    Released,
}

#[derive(Debug)]
struct ScopeFrame {
    parent: Option<ScopeId>,
    open: bool,
    bindings: HashMap<NamespaceId, Binding>,
}

impl ScopeFrame {
    fn new(parent: Option<ScopeId>) -> Self {
        Self {
            parent,
            open: true,
            bindings: HashMap::new(),
        }
    }
}

/// Registry of namespace bindings
///
/// Thread-safe; all methods take `&self`.
#[derive(Debug)]
pub struct NamespaceRegistry {
    scopes: RwLock<HashMap<ScopeId, ScopeFrame>>,
}

impl NamespaceRegistry {
    /// Create registry with an open root scope
    #[must_use]
    pub fn new() -> Self {
        let mut scopes = HashMap::new();
        scopes.insert(ScopeId::root(), ScopeFrame::new(None));
        Self {
            scopes: RwLock::new(scopes),
        }
    }

    /// Bind `id` to `path` in `scope`
    ///
    /// Re-registering a released identifier makes it resolvable again.
    ///
    /// # Errors
    /// [`NamespaceError::Unknown`] if `scope` is not open.
    pub fn add_ns(
        &self,
        scope: &ScopeId,
        id: impl Into<NamespaceId>,
        path: NamespacePath,
    ) -> Result<Namespace, NamespaceError> {
        let id = id.into();
        let mut scopes = self.scopes.write();
        let frame = open_frame_mut(&mut scopes, scope, &id)?;
        let ns = Namespace {
            id: id.clone(),
            path,
            parent: None,
            scope: scope.clone(),
        };
        tracing::trace!(scope = %scope, id = %id, path = %ns.path, "namespace registered");
        frame.bindings.insert(id, Binding::Live(ns.clone()));
        Ok(ns)
    }

    /// Open `scope` below `parent`
    ///
    /// A previously closed scope of the same id is replaced by a fresh one.
    ///
    /// # Errors
    /// - [`NamespaceError::ScopeAlreadyOpen`] if `scope` is live
    /// - [`NamespaceError::Unknown`] if `parent` is not open
    pub fn open_scope(&self, scope: ScopeId, parent: &ScopeId) -> Result<(), NamespaceError> {
        let mut scopes = self.scopes.write();
        match scopes.get(parent) {
            Some(frame) if frame.open => {}
            _ => {
                return Err(NamespaceError::Unknown {
                    id: NamespaceId::new("<scope>"),
                    scope: parent.clone(),
                })
            }
        }
        if scopes.get(&scope).is_some_and(|f| f.open) {
            return Err(NamespaceError::ScopeAlreadyOpen(scope));
        }
        scopes.insert(scope, ScopeFrame::new(Some(parent.clone())));
        Ok(())
    }

    /// Close `scope` and every scope nested below it
    ///
    /// All bindings become released; lookups through a closed scope fail
    /// with [`NamespaceError::Stale`]. Returns number of bindings released.
    pub fn close_scope(&self, scope: &ScopeId) -> usize {
        if scope.is_root() {
            return 0;
        }
        let mut scopes = self.scopes.write();
        let mut released = 0;
        for (id, frame) in scopes.iter_mut() {
            if scope.encloses(id) && frame.open {
                frame.open = false;
                for binding in frame.bindings.values_mut() {
                    if matches!(binding, Binding::Live(_)) {
                        *binding = Binding::Released;
                        released += 1;
                    }
                }
            }
        }
        tracing::debug!(scope = %scope, released, "scope closed");
        released
    }

    /// True if `scope` exists and is open
    #[must_use]
    pub fn is_open(&self, scope: &ScopeId) -> bool {
        self.scopes.read().get(scope).is_some_and(|f| f.open)
    }

    /// Resolve `id` starting from `scope`
    ///
    /// # Errors
    /// - [`NamespaceError::Unknown`] if no scope in the chain binds `id`, or
    ///   `scope` does not exist
    /// - [`NamespaceError::Stale`] if the nearest binding was released or the
    ///   scope was closed
    pub fn resolve(&self, scope: &ScopeId, id: &NamespaceId) -> Result<NamespacePath, NamespaceError> {
        self.namespace(scope, id).map(|ns| ns.path)
    }

    /// Resolve `id` and return the full record
    ///
    /// # Errors
    /// Same as [`NamespaceRegistry::resolve`].
    pub fn namespace(&self, scope: &ScopeId, id: &NamespaceId) -> Result<Namespace, NamespaceError> {
        let scopes = self.scopes.read();
        lookup(&scopes, scope, id)
    }

    /// Rebase `id` into `scope` under `parent` with `suffix`
    ///
    /// The current value is looked up from the enclosing scope of `scope`
    /// (the template binding), rebased with [`rebase_path`], and bound in
    /// `scope`. Bindings of every other scope are left untouched.
    ///
    /// # Errors
    /// - [`NamespaceError::Unknown`] if `scope` is not open or the enclosing
    ///   chain does not bind `id`
    /// - [`NamespaceError::Stale`] if the template binding was released
    pub fn rebase(
        &self,
        scope: &ScopeId,
        id: &NamespaceId,
        parent: &NamespacePath,
        suffix: &str,
    ) -> Result<NamespacePath, NamespaceError> {
        let mut scopes = self.scopes.write();

        let template_scope = match scopes.get(scope) {
            Some(frame) if frame.open => frame.parent.clone().unwrap_or_default(),
            _ => {
                return Err(NamespaceError::Unknown {
                    id: id.clone(),
                    scope: scope.clone(),
                })
            }
        };
        let current = lookup(&scopes, &template_scope, id)?;
        let path = rebase_path(&current.path, parent, suffix);

        let frame = open_frame_mut(&mut scopes, scope, id)?;
        frame.bindings.insert(
            id.clone(),
            Binding::Live(Namespace {
                id: id.clone(),
                path: path.clone(),
                parent: Some(parent.clone()),
                scope: scope.clone(),
            }),
        );
        tracing::trace!(scope = %scope, id = %id, from = %current.path, to = %path, "namespace rebased");
        Ok(path)
    }

    /// Release the binding of `id` held directly by `scope`
    ///
    /// # Errors
    /// [`NamespaceError::Unknown`] if `scope` holds no live binding for `id`.
    pub fn release(&self, scope: &ScopeId, id: &NamespaceId) -> Result<(), NamespaceError> {
        let mut scopes = self.scopes.write();
        let frame = open_frame_mut(&mut scopes, scope, id)?;
        match frame.bindings.get_mut(id) {
            Some(binding @ Binding::Live(_)) => {
                *binding = Binding::Released;
                Ok(())
            }
            _ => Err(NamespaceError::Unknown {
                id: id.clone(),
                scope: scope.clone(),
            }),
        }
    }

    /// Live bindings held directly by `scope`, sorted by identifier
    #[must_use]
    pub fn bindings(&self, scope: &ScopeId) -> Vec<Namespace> {
        let scopes = self.scopes.read();
        let mut out: Vec<Namespace> = scopes
            .get(scope)
            .filter(|f| f.open)
            .map(|f| {
                f.bindings
                    .values()
                    .filter_map(|b| match b {
                        Binding::Live(ns) => Some(ns.clone()),
                        Binding::Released => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Number of open scopes (root included)
    #[must_use]
    pub fn open_scope_count(&self) -> usize {
        self.scopes.read().values().filter(|f| f.open).count()
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn open_frame_mut<'a>(
    scopes: &'a mut HashMap<ScopeId, ScopeFrame>,
    scope: &ScopeId,
    id: &NamespaceId,
) -> Result<&'a mut ScopeFrame, NamespaceError> {
    match scopes.get_mut(scope) {
        Some(frame) if frame.open => Ok(frame),
        Some(_) => Err(NamespaceError::Stale {
            id: id.clone(),
            scope: scope.clone(),
        }),
        None => Err(NamespaceError::Unknown {
            id: id.clone(),
            scope: scope.clone(),
        }),
    }
}

fn lookup(
    scopes: &HashMap<ScopeId, ScopeFrame>,
    scope: &ScopeId,
    id: &NamespaceId,
) -> Result<Namespace, NamespaceError> {
    let unknown = || NamespaceError::Unknown {
        id: id.clone(),
        scope: scope.clone(),
    };
    let stale = || NamespaceError::Stale {
        id: id.clone(),
        scope: scope.clone(),
    };

    let mut current = Some(scope.clone());
    let mut first = true;
    while let Some(scope_id) = current {
        let frame = scopes.get(&scope_id).ok_or_else(unknown)?;
        if !frame.open {
            return Err(if first { stale() } else { unknown() });
        }
        match frame.bindings.get(id) {
            Some(Binding::Live(ns)) => return Ok(ns.clone()),
            Some(Binding::Released) => return Err(stale()),
            None => {}
        }
        first = false;
        current = frame.parent.clone();
    }
    Err(unknown())
}
