//! Fanout Namespace Registry
//!
//! Resolves symbolic namespace identifiers to concrete paths.
//!
//! # Overview
//!
//! - **NamespaceId**: symbolic identifier used by build maps and disciplines
//! - **NamespacePath**: resolved dotted path
//! - **ScopeId**: binding context (root, builder, instance)
//! - **NamespaceRegistry**: scope-chained lookup, rebase and release
//!
//! # Example
//!
//! ```rust
//! use fanout_namespace::{NamespaceId, NamespaceRegistry, ScopeId};
//!
//! let registry = NamespaceRegistry::new();
//! let root = ScopeId::root();
//! registry.add_ns(&root, "ns_disc", "Study.driver.Disc1".parse().unwrap()).unwrap();
//!
//! // One scope per scatter instance
//! let s1 = root.child("s1");
//! registry.open_scope(s1.clone(), &root).unwrap();
//! let rebased = registry
//!     .rebase(&s1, &NamespaceId::new("ns_disc"), &"Study.driver".parse().unwrap(), "s1")
//!     .unwrap();
//! assert_eq!(rebased.to_string(), "Study.driver.s1.Disc1");
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod path;
pub mod registry;

// Re-exports
pub use error::NamespaceError;
pub use path::{rebase_path, NamespaceId, NamespacePath, ScopeId};
pub use registry::{Namespace, NamespaceRegistry};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
