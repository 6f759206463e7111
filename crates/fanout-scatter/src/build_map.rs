//! Build maps
//!
//! A [`BuildMap`] tells a scatter builder where its driving list lives,
//! which namespace its instances derive from and which namespaces each
//! instance rebases. Build maps are registered by name in a
//! [`BuildMapRegistry`] and never change once a builder holds them.

use fanout_namespace::NamespaceId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::ScatterError;

/// Declarative scatter descriptor
///
/// # Example
/// ```
/// use fanout_scatter::BuildMap;
///
/// let map: BuildMap = serde_yaml::from_str(
///     "input_name: scenario_list\n\
///      input_ns: ns_scatter_scenario\n\
///      output_name: scenario_name\n\
///      scatter_ns: ns_scenario\n\
///      gather_ns: ns_scatter_scenario\n\
///      ns_to_update: [ns_disc3, ns_barrierr]\n",
/// ).unwrap();
/// map.validate().unwrap();
/// assert_eq!(map.ns_to_update.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildMap {
    /// Name of the list-valued driving variable
    pub input_name: String,
    /// Namespace holding the driving variable
    pub input_ns: NamespaceId,
    /// Per-instance key variable name
    pub output_name: String,
    /// Namespace instances derive their paths from
    pub scatter_ns: NamespaceId,
    /// Namespace receiving gathered results (defaults to `input_ns`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gather_ns: Option<NamespaceId>,
    /// Namespaces rebased per instance, in order
    #[serde(default)]
    pub ns_to_update: Vec<NamespaceId>,
}

impl BuildMap {
    /// Build map with the four required fields
    #[must_use]
    pub fn new(
        input_name: impl Into<String>,
        input_ns: impl Into<NamespaceId>,
        output_name: impl Into<String>,
        scatter_ns: impl Into<NamespaceId>,
    ) -> Self {
        Self {
            input_name: input_name.into(),
            input_ns: input_ns.into(),
            output_name: output_name.into(),
            scatter_ns: scatter_ns.into(),
            gather_ns: None,
            ns_to_update: Vec::new(),
        }
    }

    /// Set gather namespace
    #[must_use]
    pub fn with_gather_ns(mut self, ns: impl Into<NamespaceId>) -> Self {
        self.gather_ns = Some(ns.into());
        self
    }

    /// Append namespaces to rebase per instance
    #[must_use]
    pub fn with_ns_to_update<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NamespaceId>,
    {
        self.ns_to_update.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Effective gather namespace
    #[inline]
    #[must_use]
    pub fn gather_ns(&self) -> &NamespaceId {
        self.gather_ns.as_ref().unwrap_or(&self.input_ns)
    }

    /// Namespaces rebased into every instance scope: `scatter_ns` first,
    /// then `ns_to_update` without repeats
    #[must_use]
    pub fn rebased_namespaces(&self) -> Vec<&NamespaceId> {
        let mut out = vec![&self.scatter_ns];
        out.extend(self.ns_to_update.iter().filter(|id| **id != self.scatter_ns));
        out
    }

    /// Check field contents
    ///
    /// # Errors
    /// [`ScatterError::Configuration`] on an empty name or a repeated
    /// `ns_to_update` entry.
    pub fn validate(&self) -> Result<(), ScatterError> {
        for (field, value) in [
            ("input_name", self.input_name.as_str()),
            ("input_ns", self.input_ns.as_str()),
            ("output_name", self.output_name.as_str()),
            ("scatter_ns", self.scatter_ns.as_str()),
        ] {
            if value.is_empty() {
                return Err(ScatterError::Configuration(format!("build map field '{field}' is empty")));
            }
        }
        let mut seen = HashSet::new();
        for id in &self.ns_to_update {
            if !seen.insert(id) {
                return Err(ScatterError::Configuration(format!(
                    "namespace '{id}' listed twice in ns_to_update"
                )));
            }
        }
        Ok(())
    }
}

/// Named build maps
#[derive(Debug, Clone, Default)]
pub struct BuildMapRegistry {
    maps: IndexMap<String, Arc<BuildMap>>,
}

impl BuildMapRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated map
    ///
    /// # Errors
    /// [`ScatterError::Configuration`] if invalid or the name is taken.
    pub fn register(&mut self, name: impl Into<String>, map: BuildMap) -> Result<Arc<BuildMap>, ScatterError> {
        let name = name.into();
        map.validate()?;
        if self.maps.contains_key(&name) {
            return Err(ScatterError::Configuration(format!("build map '{name}' already registered")));
        }
        let map = Arc::new(map);
        self.maps.insert(name.clone(), Arc::clone(&map));
        tracing::debug!("Registered build map: {}", name);
        Ok(map)
    }

    /// Register every map of a `{name: map}` collection
    ///
    /// # Errors
    /// Same as [`BuildMapRegistry::register`].
    pub fn extend(&mut self, maps: IndexMap<String, BuildMap>) -> Result<(), ScatterError> {
        for (name, map) in maps {
            self.register(name, map)?;
        }
        Ok(())
    }

    /// Look up a map
    ///
    /// # Errors
    /// [`ScatterError::Configuration`] if unknown.
    pub fn get(&self, name: &str) -> Result<Arc<BuildMap>, ScatterError> {
        self.maps
            .get(name)
            .cloned()
            .ok_or_else(|| ScatterError::Configuration(format!("unknown build map '{name}'")))
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.maps.keys().map(String::as_str)
    }

    /// Number of maps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// No maps registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Parse a YAML `{name: map}` document
    ///
    /// # Errors
    /// Parse failure, unknown keys or invalid maps.
    pub fn from_yaml_str(text: &str) -> Result<Self, ScatterError> {
        let maps: IndexMap<String, BuildMap> =
            serde_yaml::from_str(text).map_err(|e| ScatterError::Configuration(e.to_string()))?;
        let mut registry = Self::new();
        registry.extend(maps)?;
        Ok(registry)
    }

    /// Parse a JSON `{name: map}` document
    ///
    /// # Errors
    /// Parse failure, unknown keys or invalid maps.
    pub fn from_json_str(text: &str) -> Result<Self, ScatterError> {
        let maps: IndexMap<String, BuildMap> =
            serde_json::from_str(text).map_err(|e| ScatterError::Configuration(e.to_string()))?;
        let mut registry = Self::new();
        registry.extend(maps)?;
        Ok(registry)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// I/O failure, unsupported extension, or any parse error.
    pub async fn from_file(path: &Path) -> Result<Self, ScatterError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ScatterError::Configuration(format!("{}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Err(ScatterError::Configuration(format!(
                "unsupported build map file: {}",
                path.display()
            ))),
        }
    }
}
