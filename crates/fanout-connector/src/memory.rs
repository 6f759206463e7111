//! In-memory connector

use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;

use crate::connector::{check_values, DatasetConnector, TypeMap, ValueMap};
use crate::error::ConnectorError;

/// Datasets held in process memory
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    datasets: DashMap<String, ValueMap>,
}

impl InMemoryConnector {
    /// Empty connector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a dataset
    #[must_use]
    pub fn with_dataset<I, S>(self, dataset: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (S, fanout_data::Value)>,
        S: Into<String>,
    {
        let values: ValueMap = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.datasets.insert(dataset.into(), values);
        self
    }

    /// Snapshot of a dataset
    #[must_use]
    pub fn dataset(&self, dataset: &str) -> Option<ValueMap> {
        self.datasets.get(dataset).map(|d| d.value().clone())
    }
}

#[async_trait]
impl DatasetConnector for InMemoryConnector {
    async fn get_values(&self, dataset: &str, types: &TypeMap) -> Result<ValueMap, ConnectorError> {
        let stored = self
            .datasets
            .get(dataset)
            .ok_or_else(|| ConnectorError::UnknownDataset(dataset.to_string()))?;
        let values: ValueMap = types
            .keys()
            .filter_map(|name| stored.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        drop(stored);
        check_values(dataset, &values, types)?;
        tracing::debug!("Read {} values from in-memory dataset {}", values.len(), dataset);
        Ok(values)
    }

    async fn write_values(
        &self,
        dataset: &str,
        values: &ValueMap,
        types: &TypeMap,
        create_if_missing: bool,
        override_existing: bool,
    ) -> Result<usize, ConnectorError> {
        check_values(dataset, values, types)?;
        if !create_if_missing && !self.datasets.contains_key(dataset) {
            return Err(ConnectorError::UnknownDataset(dataset.to_string()));
        }
        let mut stored = self.datasets.entry(dataset.to_string()).or_insert_with(IndexMap::new);
        let mut written = 0;
        for (name, value) in values {
            if !override_existing && stored.contains_key(name) {
                continue;
            }
            stored.insert(name.clone(), value.clone());
            written += 1;
        }
        Ok(written)
    }

    async fn list_available_datasets(&self) -> Result<Vec<String>, ConnectorError> {
        let mut names: Vec<String> = self.datasets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}
