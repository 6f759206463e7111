//! Fanout Dataset Connectors
//!
//! Moves variable values between external datasets and the
//! [`fanout_data::DataManager`].
//!
//! # Overview
//!
//! - **DatasetConnector**: async backend contract (`get_values`,
//!   `write_values`, `list_available_datasets`)
//! - **ConnectorRegistry**: connectors by id
//! - **InMemoryConnector** / **JsonFileConnector**: shipped backends
//! - **DatasetsManager**: namespace path to ordered datasets, with
//!   later datasets overriding earlier ones
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use fanout_connector::{ConnectorRegistry, DatasetRef, DatasetsManager, InMemoryConnector};
//! use fanout_data::{DataManager, Value, VariableDescriptor, VariableKey, Writer};
//!
//! # tokio_test::block_on(async {
//! let mut connectors = ConnectorRegistry::new();
//! let memory = InMemoryConnector::new().with_dataset("defaults", [("a", Value::Float(2.0))]);
//! connectors.register("mem", Arc::new(memory)).unwrap();
//!
//! let path: fanout_namespace::NamespacePath = "usecase.Disc1".parse().unwrap();
//! let data = DataManager::new();
//! let key = VariableKey::new(path.clone(), "a");
//! let spec = VariableDescriptor::float().validate("a").unwrap();
//! data.declare(key.clone(), &spec, Writer::Host).unwrap();
//!
//! let manager = DatasetsManager::new(connectors)
//!     .with_mapping(path, [DatasetRef::new("mem", "defaults")]);
//! manager.load_into(&data).await.unwrap();
//! assert_eq!(data.read(&key).unwrap(), Value::Float(2.0));
//! # });
//! ```

pub mod connector;
pub mod datasets;
pub mod error;
pub mod json_file;
pub mod memory;

pub use connector::{ConnectorRegistry, DatasetConnector, TypeMap, ValueMap};
pub use datasets::{DatasetRef, DatasetsManager, Provenance};
pub use error::ConnectorError;
pub use json_file::JsonFileConnector;
pub use memory::InMemoryConnector;
