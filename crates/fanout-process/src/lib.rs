//! Fanout Process
//!
//! Composes disciplines and scatter nodes into a process and executes it.
//!
//! # Overview
//!
//! - **Process**: owns the namespace registry and data manager, configures
//!   builders outer-to-inner and runs instances in dependency rounds
//! - **scheduler**: per-round dependency ordering with petgraph
//! - **autogather**: gathered outputs stored back as `<var>_gather`
//! - **EngineConfig / ProcessConfig**: YAML or JSON configuration
//! - **telemetry**: tracing subscriber setup
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fanout_data::{Value, VariableDescriptor};
//! use fanout_discipline::DisciplineTemplate;
//! use fanout_process::{EngineConfig, Process, ProcessDefinition};
//! use fanout_scatter::{BuildMap, GatherMode, ScatterBlueprint};
//!
//! # tokio_test::block_on(async {
//! let disc = DisciplineTemplate::builder("Disc")
//!     .output("o", VariableDescriptor::float())
//!     .behavior_fn(|ctx, _| {
//!         let o = if ctx.instance_key == "s1" { 5.0 } else { 9.0 };
//!         Ok([("o".to_string(), Value::Float(o))].into())
//!     })
//!     .build()
//!     .unwrap();
//!
//! let map = BuildMap::new("scenario_list", "ns_root", "scenario_name", "ns_root");
//! let definition = ProcessDefinition::new()
//!     .with_namespace("ns_root", "study".parse().unwrap())
//!     .with_scatter(ScatterBlueprint::new("scenarios", Arc::new(map)).with_discipline(Arc::new(disc)));
//!
//! let process = Process::new(EngineConfig::default(), definition).unwrap();
//! process.configure();
//! process.set_value("ns_root", "scenario_list", Value::string_list(["s1", "s2"])).unwrap();
//! process.configure();
//! process.execute().await.unwrap();
//!
//! let gathered = process.wait_for_gather("scenarios", "o", GatherMode::Strict).await.unwrap();
//! assert_eq!(gathered.values["s1"], Value::Float(5.0));
//! assert_eq!(gathered.values["s2"], Value::Float(9.0));
//! # });
//! ```

#![warn(missing_docs)]

pub mod autogather;
pub mod config;
pub mod error;
pub mod process;
pub mod scheduler;
pub mod telemetry;

// Re-exports
pub use autogather::{flatten, gathered_name};
pub use config::{EngineConfig, LoggingConfig, NodeConfig, ProcessConfig, ScatterNodeConfig};
pub use error::ProcessError;
pub use process::{
    ConfigureSummary, ExecutionReport, FailedInstance, NodeError, Process, ProcessDefinition,
    ProcessNode,
};
pub use scheduler::{schedule, Schedule, Slot};
