//! JSON file connector
//!
//! One file holds every dataset as `{dataset: {name: value}}`. Values are
//! decoded against the requested [`fanout_data::TypeSpec`], so dataframes
//! are stored column-wise as `{column: [cells]}`.

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::connector::{check_values, DatasetConnector, TypeMap, ValueMap};
use crate::error::ConnectorError;

type Datasets = Map<String, JsonValue>;

/// Datasets stored in a single JSON document
#[derive(Debug)]
pub struct JsonFileConnector {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileConnector {
    /// Connector over `path`; the file is read on every access
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Datasets, ConnectorError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConnectorError::Io {
                path: self.path.clone(),
                source,
            })?;
        self.parse(&text)
    }

    async fn load_or_empty(&self) -> Result<Datasets, ConnectorError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => self.parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Datasets::new()),
            Err(source) => Err(ConnectorError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn parse(&self, text: &str) -> Result<Datasets, ConnectorError> {
        match serde_json::from_str::<JsonValue>(text) {
            Ok(JsonValue::Object(map)) => Ok(map),
            Ok(_) => Err(self.format_error("top level is not an object")),
            Err(e) => Err(self.format_error(e.to_string())),
        }
    }

    fn format_error(&self, reason: impl Into<String>) -> ConnectorError {
        ConnectorError::Format {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DatasetConnector for JsonFileConnector {
    async fn get_values(&self, dataset: &str, types: &TypeMap) -> Result<ValueMap, ConnectorError> {
        let datasets = self.load().await?;
        let stored = match datasets.get(dataset) {
            Some(JsonValue::Object(stored)) => stored,
            Some(_) => return Err(self.format_error(format!("dataset '{dataset}' is not an object"))),
            None => return Err(ConnectorError::UnknownDataset(dataset.to_string())),
        };

        let mut values = ValueMap::new();
        for (name, spec) in types {
            let Some(raw) = stored.get(name) else { continue };
            let value = spec.decode(raw).map_err(|reason| ConnectorError::Decode {
                dataset: dataset.to_string(),
                name: name.clone(),
                reason,
            })?;
            values.insert(name.clone(), value);
        }
        tracing::debug!(
            "Read {} values from dataset {} in {}",
            values.len(),
            dataset,
            self.path.display()
        );
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
        let _guard = self.write_lock.lock().await;

        let mut datasets = self.load_or_empty().await?;
        if !create_if_missing && !datasets.contains_key(dataset) {
            return Err(ConnectorError::UnknownDataset(dataset.to_string()));
        }
        let stored = datasets
            .entry(dataset.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        let JsonValue::Object(stored) = stored else {
            return Err(self.format_error(format!("dataset '{dataset}' is not an object")));
        };

        let mut written = 0;
        for (name, value) in values {
            if !override_existing && stored.contains_key(name) {
                continue;
            }
            stored.insert(name.clone(), value.to_json());
            written += 1;
        }

        let text = serde_json::to_string_pretty(&datasets).map_err(|e| self.format_error(e.to_string()))?;
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|source| ConnectorError::Io {
                path: self.path.clone(),
                source,
            })?;
        tracing::info!("Wrote {} values to dataset {} in {}", written, dataset, self.path.display());
        Ok(written)
    }

    async fn list_available_datasets(&self) -> Result<Vec<String>, ConnectorError> {
        Ok(self.load().await?.keys().cloned().collect())
    }
}
