//! Datasets manager
//!
//! Maps namespace paths to an ordered list of datasets and moves values of
//! the variables declared there between the connectors and the
//! [`DataManager`]. When several datasets hold the same name the later one
//! wins, and the winning dataset is recorded as the value's provenance.

use fanout_data::{DataManager, VariableKey, Writer};
use fanout_namespace::NamespacePath;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use tracing::{debug, info, info_span, Instrument};

use crate::connector::{ConnectorRegistry, TypeMap, ValueMap};
use crate::error::ConnectorError;

/// Dataset reached through a registered connector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetRef {
    /// Connector id
    pub connector: String,
    /// Dataset id within the connector
    pub dataset: String,
}

impl DatasetRef {
    /// Reference `dataset` on `connector`
    #[must_use]
    pub fn new(connector: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            dataset: dataset.into(),
        }
    }
}

impl Display for DatasetRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.connector, self.dataset)
    }
}

/// Where each loaded value came from
pub type Provenance = IndexMap<VariableKey, DatasetRef>;

/// Namespace-to-datasets mapping plus the connectors it refers to
#[derive(Debug, Clone, Default)]
pub struct DatasetsManager {
    connectors: ConnectorRegistry,
    mapping: IndexMap<NamespacePath, Vec<DatasetRef>>,
}

impl DatasetsManager {
    /// Manager over `connectors` with no mapping yet
    #[must_use]
    pub fn new(connectors: ConnectorRegistry) -> Self {
        Self {
            connectors,
            mapping: IndexMap::new(),
        }
    }

    /// Append datasets for `path`, lowest priority first
    #[must_use]
    pub fn with_mapping<I>(mut self, path: NamespacePath, datasets: I) -> Self
    where
        I: IntoIterator<Item = DatasetRef>,
    {
        self.mapping.entry(path).or_default().extend(datasets);
        self
    }

    /// Install a `{namespace path: [dataset refs]}` document
    ///
    /// # Errors
    /// [`ConnectorError::Configuration`] on a parse failure or a reference
    /// to an unregistered connector.
    pub fn with_mapping_yaml(mut self, text: &str) -> Result<Self, ConnectorError> {
        let mapping: IndexMap<NamespacePath, Vec<DatasetRef>> =
            serde_yaml::from_str(text).map_err(|e| ConnectorError::Configuration(e.to_string()))?;
        for refs in mapping.values() {
            for r in refs {
                if self.connectors.get(&r.connector).is_err() {
                    return Err(ConnectorError::Configuration(format!(
                        "dataset {r} uses unregistered connector"
                    )));
                }
            }
        }
        for (path, refs) in mapping {
            self.mapping.entry(path).or_default().extend(refs);
        }
        Ok(self)
    }

    /// Datasets mapped to `path`
    #[must_use]
    pub fn datasets_for(&self, path: &NamespacePath) -> &[DatasetRef] {
        self.mapping.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Connectors in use
    #[must_use]
    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Values of the variables declared directly under `path`, merged
    /// across its datasets in order
    ///
    /// # Errors
    /// Unknown connector or dataset, or a value of the wrong type.
    pub async fn fetch(
        &self,
        data: &DataManager,
        path: &NamespacePath,
    ) -> Result<IndexMap<String, (fanout_data::Value, DatasetRef)>, ConnectorError> {
        let types: TypeMap = data
            .entries_in(path)
            .into_iter()
            .map(|entry| (entry.key.name, entry.spec.type_spec))
            .collect();
        let mut merged = IndexMap::new();
        if types.is_empty() {
            return Ok(merged);
        }

        for dataset in self.datasets_for(path) {
            let connector = self.connectors.get(&dataset.connector)?;
            let values = connector.get_values(&dataset.dataset, &types).await?;
            debug!("{} supplies {} values for {}", dataset, values.len(), path);
            for (name, value) in values {
                merged.insert(name, (value, dataset.clone()));
            }
        }
        Ok(merged)
    }

    /// Write every mapped value into `data` as the host
    ///
    /// Namespaces with no declared variable are skipped.
    ///
    /// # Errors
    /// Any fetch failure, or the data manager rejecting a value.
    pub async fn load_into(&self, data: &DataManager) -> Result<Provenance, ConnectorError> {
        let mut provenance = Provenance::new();
        for path in self.mapping.keys() {
            let fetched = self
                .fetch(data, path)
                .instrument(info_span!("load_datasets", namespace = %path))
                .await?;
            for (name, (value, source)) in fetched {
                let key = VariableKey::new(path.clone(), name);
                data.write(&key, value, Writer::Host)?;
                provenance.insert(key, source);
            }
        }
        info!("Loaded {} values from datasets", provenance.len());
        Ok(provenance)
    }

    /// Export the set values declared directly under `path` to `target`
    ///
    /// # Errors
    /// Unknown connector, or the connector refusing the write.
    pub async fn export(
        &self,
        data: &DataManager,
        path: &NamespacePath,
        target: &DatasetRef,
        create_if_missing: bool,
        override_existing: bool,
    ) -> Result<usize, ConnectorError> {
        let connector = self.connectors.get(&target.connector)?;
        let mut values = ValueMap::new();
        let mut types = TypeMap::new();
        for entry in data.entries_in(path) {
            if let Some(value) = entry.value {
                values.insert(entry.key.name.clone(), value);
                types.insert(entry.key.name, entry.spec.type_spec);
            }
        }
        let written = connector
            .write_values(&target.dataset, &values, &types, create_if_missing, override_existing)
            .await?;
        info!("Exported {} values from {} to {}", written, path, target);
        Ok(written)
    }
}
