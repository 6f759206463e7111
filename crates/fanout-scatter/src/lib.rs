//! Fanout Scatter
//!
//! Replicates disciplines per element of a runtime list and gathers their
//! outputs back.
//!
//! # Overview
//!
//! - **BuildMap**: where the driving list lives and which namespaces to rebase
//! - **ScatterBuilder**: incremental reconciliation of instances with the list
//! - **GatherAggregator**: ordered mapping of one output across instances
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fanout_data::{DataManager, Value, Writer};
//! use fanout_namespace::{NamespaceRegistry, ScopeId};
//! use fanout_scatter::{BuildMap, ScatterBlueprint, ScatterBuilder};
//!
//! let registry = NamespaceRegistry::new();
//! let data = DataManager::new();
//! registry.add_ns(&ScopeId::root(), "ns_root", "root".parse().unwrap()).unwrap();
//!
//! let map = BuildMap::new("names", "ns_root", "name", "ns_root");
//! let blueprint = ScatterBlueprint::new("driver", Arc::new(map));
//! let mut builder = ScatterBuilder::new(Arc::new(blueprint), ScopeId::root()).unwrap();
//!
//! builder.configure(&registry, &data).unwrap(); // pending: list not written
//! let driver = builder.driver_key(&registry).unwrap();
//! data.write(&driver, Value::string_list(["s1", "s2"]), Writer::Host).unwrap();
//!
//! let report = builder.configure(&registry, &data).unwrap();
//! assert_eq!(report.created, vec!["s1", "s2"]);
//! ```

#![warn(missing_docs)]

pub mod build_map;
pub mod builder;
pub mod error;
pub mod gather;

// Re-exports
pub use build_map::{BuildMap, BuildMapRegistry};
pub use builder::{
    driving_keys, BuilderStatus, Element, ReconcileReport, ScatterBlueprint, ScatterBuilder,
    ScatterInstance, SCENARIO_NAME_COLUMN, SELECTED_SCENARIO_COLUMN,
};
pub use error::ScatterError;
pub use gather::{GatherAggregator, GatherMode, GatherOutcome, GatherResult};
