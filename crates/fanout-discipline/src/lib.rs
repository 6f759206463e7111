//! Fanout Disciplines
//!
//! Units of computation with typed inputs and outputs.
//!
//! # Overview
//!
//! - **DisciplineTemplate**: immutable declarations plus a behaviour
//! - **DisciplineInstance**: one bound copy per scatter element
//! - **InstanceState**: `pending -> configured -> ready -> executed -> stale`,
//!   plus `failed` and `destroyed`
//!
//! # Example
//!
//! ```rust
//! use fanout_data::{Value, VariableDescriptor};
//! use fanout_discipline::{DisciplineTemplate, ValueMap};
//!
//! let template = DisciplineTemplate::builder("Disc1")
//!     .input("a", VariableDescriptor::float())
//!     .output("y", VariableDescriptor::float())
//!     .behavior_fn(|_, inputs| {
//!         let a = inputs["a"].as_float().unwrap_or_default();
//!         Ok(ValueMap::from([("y".to_string(), Value::Float(a + 1.0))]))
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(template.name(), "Disc1");
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod handle;
pub mod instance;
pub mod registry;
pub mod state;
pub mod template;

// Re-exports
pub use error::DisciplineError;
pub use handle::InstanceHandle;
pub use instance::{
    CompletedRun, DisciplineInstance, ExecutionRecord, ExecutionTicket, RunOutcome,
    VariableBinding,
};
pub use registry::TemplateRegistry;
pub use state::{allowed_transitions, validate_transition, InstanceState};
pub use template::{
    DisciplineBehavior, DisciplineTemplate, DisciplineTemplateBuilder, FnBehavior, RunContext,
    ValueMap,
};
