//! Fanout Data Manager
//!
//! Typed variable store shared by every discipline instance of a process.
//!
//! # Overview
//!
//! - **Value / TypeSpec**: runtime values and their checked shapes
//! - **VariableDescriptor**: configuration-level declaration of a variable
//! - **DataManager**: `(namespace, name) -> entry` with revisions
//!
//! # Example
//!
//! ```rust
//! use fanout_data::{DataManager, Value, VariableDescriptor, VariableKey, Writer};
//!
//! let dm = DataManager::new();
//! let key = VariableKey::new("root.s1".parse().unwrap(), "o");
//! let spec = VariableDescriptor::float().validate("o").unwrap();
//! dm.declare(key.clone(), &spec, Writer::Host).unwrap();
//!
//! dm.write(&key, Value::Float(5.0), Writer::Host).unwrap();
//! assert_eq!(dm.read(&key).unwrap(), Value::Float(5.0));
//!
//! // Shape mismatch is rejected, stored value unchanged
//! assert!(dm.write(&key, Value::from("five"), Writer::Host).is_err());
//! assert_eq!(dm.read(&key).unwrap(), Value::Float(5.0));
//! ```

#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod manager;
pub mod value;

// Re-exports
pub use descriptor::{
    DataframeDescriptor, SubtypeDescriptor, VariableDescriptor, VariableSpec, Visibility,
};
pub use error::DataError;
pub use manager::{DataManager, OwnerId, VariableEntry, VariableKey, Writer};
pub use value::{DataFrame, TypeSpec, TypeTag, Value};
