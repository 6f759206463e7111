//! Connector contract and registry

use async_trait::async_trait;
use fanout_data::{TypeSpec, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConnectorError;

/// Requested variables with the types to decode them as
pub type TypeMap = IndexMap<String, TypeSpec>;

/// Values keyed by variable name
pub type ValueMap = IndexMap<String, Value>;

/// Storage backend holding named datasets of variables
///
/// The engine treats every backend the same way; nothing depends on the
/// storage format behind it.
#[async_trait]
pub trait DatasetConnector: Send + Sync + fmt::Debug {
    /// Values of the requested names present in `dataset`
    ///
    /// Names the dataset does not hold are left out of the result.
    async fn get_values(&self, dataset: &str, types: &TypeMap) -> Result<ValueMap, ConnectorError>;

    /// Store `values` in `dataset`; returns the number written
    ///
    /// Without `create_if_missing` an absent dataset is an error. Without
    /// `override_existing` names already present keep their stored value.
    async fn write_values(
        &self,
        dataset: &str,
        values: &ValueMap,
        types: &TypeMap,
        create_if_missing: bool,
        override_existing: bool,
    ) -> Result<usize, ConnectorError>;

    /// Dataset identifiers
    async fn list_available_datasets(&self) -> Result<Vec<String>, ConnectorError>;
}

/// Connectors by id
#[derive(Debug, Clone, Default)]
pub struct ConnectorRegistry {
    connectors: IndexMap<String, Arc<dyn DatasetConnector>>,
}

impl ConnectorRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector
    ///
    /// # Errors
    /// [`ConnectorError::DuplicateConnector`] if the id is taken.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        connector: Arc<dyn DatasetConnector>,
    ) -> Result<(), ConnectorError> {
        let id = id.into();
        if self.connectors.contains_key(&id) {
            return Err(ConnectorError::DuplicateConnector(id));
        }
        tracing::debug!("Registered connector: {}", id);
        self.connectors.insert(id, connector);
        Ok(())
    }

    /// Look up a connector
    ///
    /// # Errors
    /// [`ConnectorError::UnknownConnector`].
    pub fn get(&self, id: &str) -> Result<Arc<dyn DatasetConnector>, ConnectorError> {
        self.connectors
            .get(id)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownConnector(id.to_string()))
    }

    /// Registered ids
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }
}

pub(crate) fn check_values(dataset: &str, values: &ValueMap, types: &TypeMap) -> Result<(), ConnectorError> {
    for (name, value) in values {
        if let Some(spec) = types.get(name) {
            spec.check(value).map_err(|reason| ConnectorError::Decode {
                dataset: dataset.to_string(),
                name: name.clone(),
                reason,
            })?;
        }
    }
    Ok(())
}
