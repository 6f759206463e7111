//! Engine and process configuration
//!
//! Both documents load from YAML or JSON. Unknown keys are rejected.

use fanout_discipline::TemplateRegistry;
use fanout_namespace::{NamespaceId, NamespacePath};
use fanout_scatter::{BuildMap, BuildMapRegistry, ScatterBlueprint};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ProcessError;
use crate::process::{ProcessDefinition, ProcessNode};

/// Logging setup consumed by [`crate::telemetry::init_tracing`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    /// JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Set the filter directive
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Toggle JSON output
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Root namespace path of the study
    pub study_name: String,
    /// Upper bound on concurrently running discipline tasks
    pub max_parallel_instances: usize,
    /// Gather in strict mode by default
    pub strict_gather: bool,
    /// Rounds after which execution gives up
    pub max_rounds: usize,
    /// Logging setup
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            study_name: "study".to_string(),
            max_parallel_instances: 8,
            strict_gather: false,
            max_rounds: 100,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Set the study name
    #[must_use]
    pub fn with_study_name(mut self, name: impl Into<String>) -> Self {
        self.study_name = name.into();
        self
    }

    /// Set the concurrency bound
    #[must_use]
    pub fn with_max_parallel_instances(mut self, n: usize) -> Self {
        self.max_parallel_instances = n;
        self
    }

    /// Choose the default gather mode
    #[must_use]
    pub fn with_strict_gather(mut self, strict: bool) -> Self {
        self.strict_gather = strict;
        self
    }

    /// Set the round limit
    #[must_use]
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Set logging
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Root path of the study
    ///
    /// # Errors
    /// [`ProcessError::Configuration`] if `study_name` is not a valid path.
    pub fn study_path(&self) -> Result<NamespacePath, ProcessError> {
        self.study_name
            .parse()
            .map_err(|e| ProcessError::Configuration(format!("study_name: {e}")))
    }

    /// Check field contents
    ///
    /// # Errors
    /// [`ProcessError::Configuration`] on a zero bound or a bad study name.
    pub fn validate(&self) -> Result<(), ProcessError> {
        self.study_path()?;
        if self.max_parallel_instances == 0 {
            return Err(ProcessError::Configuration(
                "max_parallel_instances must be at least 1".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(ProcessError::Configuration("max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Parse YAML
    ///
    /// # Errors
    /// Parse failure, unknown keys or invalid values.
    pub fn from_yaml_str(text: &str) -> Result<Self, ProcessError> {
        let config: Self = parse_yaml(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse JSON
    ///
    /// # Errors
    /// Parse failure, unknown keys or invalid values.
    pub fn from_json_str(text: &str) -> Result<Self, ProcessError> {
        let config: Self = parse_json(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// I/O failure, unsupported extension, or any parse error.
    pub async fn from_file(path: &Path) -> Result<Self, ProcessError> {
        let config: Self = load_file(path).await?;
        config.validate()?;
        Ok(config)
    }
}

/// Process node as written in a configuration document
///
/// ```yaml
/// - discipline: Disc1
/// - scatter:
///     name: multi_scenarios
///     build_map: scenario
///     elements: [{discipline: Disc1}]
///     autogather: [o]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeConfig {
    /// Template by registered name
    Discipline(String),
    /// Scatter node
    Scatter(ScatterNodeConfig),
}

/// Scatter node in a configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScatterNodeConfig {
    /// Node name
    pub name: String,
    /// Registered build map name
    pub build_map: String,
    /// Replicated elements
    #[serde(default)]
    pub elements: Vec<NodeConfig>,
    /// Outputs gathered automatically
    #[serde(default)]
    pub autogather: Vec<String>,
}

/// Namespaces, build maps and node tree of a process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// Root-scope namespace bindings
    #[serde(default)]
    pub namespaces: IndexMap<NamespaceId, NamespacePath>,
    /// Named build maps
    #[serde(default)]
    pub build_maps: IndexMap<String, BuildMap>,
    /// Top-level nodes in coupling order
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub nodes: Vec<NodeConfig>,
}

impl ProcessConfig {
    /// Parse YAML
    ///
    /// # Errors
    /// Parse failure or unknown keys.
    pub fn from_yaml_str(text: &str) -> Result<Self, ProcessError> {
        parse_yaml(text)
    }

    /// Parse JSON
    ///
    /// # Errors
    /// Parse failure or unknown keys.
    pub fn from_json_str(text: &str) -> Result<Self, ProcessError> {
        parse_json(text)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// I/O failure, unsupported extension, or any parse error.
    pub async fn from_file(path: &Path) -> Result<Self, ProcessError> {
        load_file(path).await
    }

    /// Resolve template and build map names into a definition
    ///
    /// # Errors
    /// Unknown template or build map, or an invalid build map.
    pub fn into_definition(self, templates: &TemplateRegistry) -> Result<ProcessDefinition, ProcessError> {
        let mut maps = BuildMapRegistry::new();
        maps.extend(self.build_maps)?;

        let mut definition = ProcessDefinition::new();
        for (id, path) in self.namespaces {
            definition = definition.with_namespace(id, path);
        }
        for node in &self.nodes {
            definition = definition.with_node(resolve_node(node, templates, &maps)?);
        }
        Ok(definition)
    }
}

fn resolve_node(
    node: &NodeConfig,
    templates: &TemplateRegistry,
    maps: &BuildMapRegistry,
) -> Result<ProcessNode, ProcessError> {
    match node {
        NodeConfig::Discipline(name) => Ok(ProcessNode::Discipline(templates.get(name)?)),
        NodeConfig::Scatter(scatter) => Ok(ProcessNode::Scatter(resolve_scatter(scatter, templates, maps)?)),
    }
}

fn resolve_scatter(
    config: &ScatterNodeConfig,
    templates: &TemplateRegistry,
    maps: &BuildMapRegistry,
) -> Result<ScatterBlueprint, ProcessError> {
    let mut blueprint = ScatterBlueprint::new(config.name.clone(), maps.get(&config.build_map)?);
    for element in &config.elements {
        blueprint = match resolve_node(element, templates, maps)? {
            ProcessNode::Discipline(template) => blueprint.with_discipline(template),
            ProcessNode::Scatter(inner) => blueprint.with_scatter(inner),
        };
    }
    for var in &config.autogather {
        blueprint = blueprint.with_autogather(var.clone());
    }
    Ok(blueprint)
}

fn parse_yaml<T: DeserializeOwned>(text: &str) -> Result<T, ProcessError> {
    serde_yaml::from_str(text).map_err(|e| ProcessError::Configuration(e.to_string()))
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, ProcessError> {
    serde_json::from_str(text).map_err(|e| ProcessError::Configuration(e.to_string()))
}

async fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ProcessError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ProcessError::Configuration(format!("{}: {e}", path.display())))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&text),
        Some("yaml" | "yml") => parse_yaml(&text),
        _ => Err(ProcessError::Configuration(format!(
            "unsupported configuration file: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_discipline::{DisciplineTemplate, ValueMap};
    use std::io::Write;

    const PROCESS: &str = "
namespaces:
  ns_scatter_scenario: study
  ns_scenario: study.multi_scenarios
build_maps:
  scenario:
    input_name: scenario_list
    input_ns: ns_scatter_scenario
    output_name: scenario_name
    scatter_ns: ns_scenario
nodes:
  - scatter:
      name: multi_scenarios
      build_map: scenario
      elements:
        - discipline: Disc1
      autogather: [o]
";

    fn templates() -> TemplateRegistry {
        let mut registry = TemplateRegistry::new();
        registry
            .register(
                DisciplineTemplate::builder("Disc1")
                    .behavior_fn(|_, _| Ok(ValueMap::new()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.study_name, "study");
        assert_eq!(config.logging.filter, "info");
        assert!(!config.strict_gather);
        config.validate().unwrap();
    }

    #[test]
    fn engine_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str("study_name: MyCase\nlogging:\n  json: true\n").unwrap();
        assert_eq!(config.study_name, "MyCase");
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "info");
        assert_eq!(config.max_parallel_instances, 8);
    }

    #[test]
    fn engine_rejects_unknown_key_and_zero_bound() {
        assert!(EngineConfig::from_json_str(r#"{"workers": 2}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"max_parallel_instances": 0}"#).is_err());
        assert!(EngineConfig::default().with_study_name("a..b").validate().is_err());
    }

    #[test]
    fn process_yaml_into_definition() {
        let config = ProcessConfig::from_yaml_str(PROCESS).unwrap();
        assert_eq!(config.namespaces.len(), 2);
        let definition = config.into_definition(&templates()).unwrap();
        assert_eq!(definition.nodes().len(), 1);
        let ProcessNode::Scatter(blueprint) = &definition.nodes()[0] else {
            panic!("expected scatter node");
        };
        assert_eq!(blueprint.name, "multi_scenarios");
        assert_eq!(blueprint.elements.len(), 1);
        assert_eq!(blueprint.autogather, vec!["o"]);
    }

    #[test]
    fn unknown_template_rejected() {
        let config = ProcessConfig::from_yaml_str("nodes:\n  - discipline: Missing\n").unwrap();
        assert!(config.into_definition(&templates()).is_err());
    }

    #[test]
    fn unknown_build_map_key_rejected() {
        let text = "build_maps:\n  m:\n    input_name: l\n    input_ns: a\n    output_name: k\n    scatter_ns: b\n    input_type: string_list\n";
        assert!(ProcessConfig::from_yaml_str(text).is_err());
    }

    #[tokio::test]
    async fn process_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"namespaces": {{"ns_root": "study"}}, "nodes": [{{"discipline": "Disc1"}}]}}"#
        )
        .unwrap();
        let config = ProcessConfig::from_file(file.path()).await.unwrap();
        assert_eq!(config.nodes, vec![NodeConfig::Discipline("Disc1".to_string())]);

        let other = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(ProcessConfig::from_file(other.path()).await.is_err());
    }
}
