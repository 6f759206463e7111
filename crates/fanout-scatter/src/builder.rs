//! Scatter builder
//!
//! Replicates a list of elements (discipline templates or nested scatters)
//! once per key of a driving list and keeps the replicas in step with the
//! list by reconciliation:
//!
//! - keys in both the old and the new list are left untouched
//! - keys only in the old list are torn down
//! - keys only in the new list are created
//!
//! A reconciliation pass is atomic. Every new instance is built first; if
//! one fails, the ones built so far are rolled back and the builder keeps
//! its previous instances, order and status.

use fanout_data::{
    DataError, DataManager, TypeSpec, TypeTag, Value, VariableKey, VariableSpec, Writer,
};
use fanout_discipline::{DisciplineInstance, DisciplineTemplate, InstanceHandle};
use fanout_namespace::{NamespacePath, NamespaceRegistry, ScopeId};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, info_span};

use crate::build_map::BuildMap;
use crate::error::ScatterError;

/// Column naming the scenario in a dataframe driving value
pub const SCENARIO_NAME_COLUMN: &str = "scenario_name";

/// Column selecting the scenario in a dataframe driving value
pub const SELECTED_SCENARIO_COLUMN: &str = "selected_scenario";

/// What a scatter replicates per key
#[derive(Debug, Clone)]
pub enum Element {
    /// One discipline instance per key
    Discipline(Arc<DisciplineTemplate>),
    /// One nested builder per key
    Scatter(Arc<ScatterBlueprint>),
}

/// Immutable description of a scatter
#[derive(Debug, Clone)]
pub struct ScatterBlueprint {
    /// Node name
    pub name: String,
    /// Build map
    pub map: Arc<BuildMap>,
    /// Replicated elements, in coupling order
    pub elements: Vec<Element>,
    /// Output variables gathered automatically after execution
    pub autogather: Vec<String>,
}

impl ScatterBlueprint {
    /// Blueprint with no elements
    #[must_use]
    pub fn new(name: impl Into<String>, map: Arc<BuildMap>) -> Self {
        Self {
            name: name.into(),
            map,
            elements: Vec::new(),
            autogather: Vec::new(),
        }
    }

    /// Replicate a discipline
    #[must_use]
    pub fn with_discipline(mut self, template: Arc<DisciplineTemplate>) -> Self {
        self.elements.push(Element::Discipline(template));
        self
    }

    /// Replicate a nested scatter
    #[must_use]
    pub fn with_scatter(mut self, blueprint: ScatterBlueprint) -> Self {
        self.elements.push(Element::Scatter(Arc::new(blueprint)));
        self
    }

    /// Gather `var` automatically
    #[must_use]
    pub fn with_autogather(mut self, var: impl Into<String>) -> Self {
        self.autogather.push(var.into());
        self
    }
}

/// Builder configuration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderStatus {
    /// Driving list not resolved yet
    Pending,
    /// Instances match the last resolved driving list
    Configured,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Builder display name
    pub builder: String,
    /// Status after the pass
    pub status: BuilderStatus,
    /// Keys created, in driving-list order
    pub created: Vec<String>,
    /// Keys destroyed, in previous order
    pub destroyed: Vec<String>,
    /// Keys left untouched
    pub retained: Vec<String>,
}

impl ReconcileReport {
    fn unchanged(builder: String, status: BuilderStatus, retained: Vec<String>) -> Self {
        Self {
            builder,
            status,
            created: Vec::new(),
            destroyed: Vec::new(),
            retained,
        }
    }

    /// No instance created or destroyed
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty()
    }
}

/// One scatter element
#[derive(Debug)]
pub struct ScatterInstance {
    key: String,
    scope: ScopeId,
    path: NamespacePath,
    key_var: VariableKey,
    key_declared: bool,
    disciplines: Vec<Arc<InstanceHandle>>,
    children: Vec<ScatterBuilder>,
}

impl ScatterInstance {
    /// Scatter key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Namespace scope of this instance
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Rebased `scatter_ns` path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &NamespacePath {
        &self.path
    }

    /// Address of the `output_name` key variable
    #[inline]
    #[must_use]
    pub fn key_var(&self) -> &VariableKey {
        &self.key_var
    }

    /// Discipline instances directly under this element
    #[inline]
    #[must_use]
    pub fn disciplines(&self) -> &[Arc<InstanceHandle>] {
        &self.disciplines
    }

    /// Nested builders
    #[inline]
    #[must_use]
    pub fn children(&self) -> &[ScatterBuilder] {
        &self.children
    }

    /// Nested builders, mutable
    #[inline]
    pub fn children_mut(&mut self) -> &mut [ScatterBuilder] {
        &mut self.children
    }

    /// Every discipline handle at or below this element
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<InstanceHandle>> {
        let mut out = self.disciplines.clone();
        for child in &self.children {
            out.extend(child.handles());
        }
        out
    }

    /// Address of `var` as produced under this element
    ///
    /// Outputs of the element's own disciplines win; otherwise the gather
    /// namespace of each nested builder is searched.
    #[must_use]
    pub fn locate(
        &self,
        var: &str,
        registry: &NamespaceRegistry,
        data: &DataManager,
    ) -> Option<VariableKey> {
        for handle in &self.disciplines {
            if let Some(key) = handle.lock().output_key(var) {
                return Some(key.clone());
            }
        }
        self.children.iter().find_map(|child| {
            let path = child.gather_path(registry).ok()?;
            let key = VariableKey::new(path, var);
            data.contains(&key).then_some(key)
        })
    }

    fn destroy(mut self, registry: &NamespaceRegistry, data: &DataManager) {
        for child in &mut self.children {
            child.teardown(registry, data);
        }
        for handle in &self.disciplines {
            if handle.cancel() {
                debug!("Cancelled running task of {}", handle.lock().display_name());
            }
            handle.lock().teardown(data);
        }
        if self.key_declared {
            if let Err(e) = data.undeclare(&self.key_var) {
                debug!("Key variable {}: {}", self.key_var, e);
            }
        }
        registry.close_scope(&self.scope);
    }
}

/// Reconciling builder for one scatter node
#[derive(Debug)]
pub struct ScatterBuilder {
    blueprint: Arc<ScatterBlueprint>,
    scope: ScopeId,
    status: BuilderStatus,
    order: Vec<String>,
    instances: IndexMap<String, ScatterInstance>,
    driver_declared: Option<VariableKey>,
}

impl ScatterBuilder {
    /// Builder resolving its namespaces from `scope`
    ///
    /// # Errors
    /// [`ScatterError::Configuration`] if the build map is invalid.
    pub fn new(blueprint: Arc<ScatterBlueprint>, scope: ScopeId) -> Result<Self, ScatterError> {
        blueprint.map.validate()?;
        Ok(Self {
            blueprint,
            scope,
            status: BuilderStatus::Pending,
            order: Vec::new(),
            instances: IndexMap::new(),
            driver_declared: None,
        })
    }

    /// Node name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.blueprint.name
    }

    /// Name qualified by scope (`outer/scenario1/inner`), unique in a process
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.scope.is_root() {
            self.blueprint.name.clone()
        } else {
            format!("{}/{}", self.scope, self.blueprint.name)
        }
    }

    /// Blueprint
    #[inline]
    #[must_use]
    pub fn blueprint(&self) -> &Arc<ScatterBlueprint> {
        &self.blueprint
    }

    /// Build map
    #[inline]
    #[must_use]
    pub fn map(&self) -> &BuildMap {
        &self.blueprint.map
    }

    /// Scope namespaces are resolved from
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Configuration status
    #[inline]
    #[must_use]
    pub fn status(&self) -> BuilderStatus {
        self.status
    }

    /// Driving list captured at the last successful configure
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Instance for `key`
    #[must_use]
    pub fn instance(&self, key: &str) -> Option<&ScatterInstance> {
        self.instances.get(key)
    }

    /// Instances in driving-list order
    pub fn instances(&self) -> impl Iterator<Item = &ScatterInstance> {
        self.instances.values()
    }

    /// Instances in driving-list order, mutable
    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut ScatterInstance> {
        self.instances.values_mut()
    }

    /// Every discipline handle under this builder, nested ones included
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<InstanceHandle>> {
        self.instances.values().flat_map(ScatterInstance::handles).collect()
    }

    /// Scope of the instance for `key`: `<builder scope>/<name>/<key>`
    ///
    /// The builder name keeps siblings that share keys apart. The scope
    /// chain still links the instance directly to the builder scope.
    #[must_use]
    pub fn instance_scope(&self, key: &str) -> ScopeId {
        self.scope.child(self.blueprint.name.as_str()).child(key)
    }

    /// Address of the driving variable
    ///
    /// # Errors
    /// Namespace resolution of `input_ns`.
    pub fn driver_key(&self, registry: &NamespaceRegistry) -> Result<VariableKey, ScatterError> {
        let map = self.map();
        let path = registry.resolve(&self.scope, &map.input_ns)?;
        Ok(VariableKey::new(path, map.input_name.clone()))
    }

    /// Resolved gather namespace
    ///
    /// # Errors
    /// Namespace resolution of `gather_ns`.
    pub fn gather_path(&self, registry: &NamespaceRegistry) -> Result<NamespacePath, ScatterError> {
        Ok(registry.resolve(&self.scope, self.map().gather_ns())?)
    }

    /// Reconcile instances with the current driving value
    ///
    /// While the driving value is unset this is a no-op and the builder
    /// keeps its status; the driving variable (a list of strings) is then
    /// declared if nothing else declared it.
    ///
    /// # Errors
    /// - [`ScatterError::Namespace`] if `input_ns` or `scatter_ns` cannot be
    ///   resolved from the builder scope
    /// - [`ScatterError::DuplicateKey`] for a repeated key
    /// - [`ScatterError::Configuration`] for a driving value of the wrong shape
    /// - any error raised while creating an instance
    ///
    /// On error nothing is changed.
    pub fn configure(
        &mut self,
        registry: &NamespaceRegistry,
        data: &DataManager,
    ) -> Result<ReconcileReport, ScatterError> {
        let span = info_span!("configure", builder = %self.display_name());
        let _enter = span.enter();

        let driver = self.driver_key(registry)?;
        let Some(keys) = self.read_keys(&driver, data)? else {
            if self.driver_declared.is_none() && !data.contains(&driver) {
                data.declare(driver.clone(), &driver_spec(), Writer::Host)?;
                self.driver_declared = Some(driver.clone());
            }
            debug!("Driving value {} not set, builder stays {:?}", driver, self.status);
            return Ok(ReconcileReport::unchanged(
                self.display_name(),
                self.status,
                self.order.clone(),
            ));
        };

        if self.status == BuilderStatus::Configured && keys == self.order {
            return Ok(ReconcileReport::unchanged(
                self.display_name(),
                self.status,
                self.order.clone(),
            ));
        }

        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let to_create: Vec<String> = keys
            .iter()
            .filter(|k| !self.instances.contains_key(k.as_str()))
            .cloned()
            .collect();
        let to_destroy: Vec<String> = self
            .order
            .iter()
            .filter(|k| !wanted.contains(k.as_str()))
            .cloned()
            .collect();

        let mut created: IndexMap<String, ScatterInstance> = IndexMap::new();
        for key in &to_create {
            match self.create_instance(key, registry, data) {
                Ok(instance) => {
                    created.insert(key.clone(), instance);
                }
                Err(e) => {
                    for (_, instance) in created {
                        instance.destroy(registry, data);
                    }
                    return Err(e);
                }
            }
        }

        for key in &to_destroy {
            if let Some(instance) = self.instances.shift_remove(key) {
                instance.destroy(registry, data);
            }
        }

        let mut retained = Vec::new();
        let mut next = IndexMap::with_capacity(keys.len());
        for key in &keys {
            if let Some(instance) = self.instances.shift_remove(key) {
                retained.push(key.clone());
                next.insert(key.clone(), instance);
            } else if let Some(instance) = created.shift_remove(key) {
                next.insert(key.clone(), instance);
            }
        }

        self.instances = next;
        self.order = keys;
        self.status = BuilderStatus::Configured;

        let report = ReconcileReport {
            builder: self.display_name(),
            status: self.status,
            created: to_create,
            destroyed: to_destroy,
            retained,
        };
        info!(
            "Configured builder {}: {} created, {} destroyed, {} retained",
            report.builder,
            report.created.len(),
            report.destroyed.len(),
            report.retained.len()
        );
        Ok(report)
    }

    /// Destroy every instance and release the driving variable
    pub fn teardown(&mut self, registry: &NamespaceRegistry, data: &DataManager) {
        for (_, instance) in self.instances.drain(..) {
            instance.destroy(registry, data);
        }
        if let Some(driver) = self.driver_declared.take() {
            if let Err(e) = data.undeclare(&driver) {
                debug!("Driving variable {}: {}", driver, e);
            }
        }
        self.order.clear();
        self.status = BuilderStatus::Pending;
    }

    fn read_keys(
        &self,
        driver: &VariableKey,
        data: &DataManager,
    ) -> Result<Option<Vec<String>>, ScatterError> {
        let value = match data.read(driver) {
            Ok(value) => value,
            Err(DataError::ValueNotSet(_) | DataError::Undeclared(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let keys = driving_keys(&value).map_err(|reason| {
            ScatterError::Configuration(format!("driving value {driver}: {reason}"))
        })?;

        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if key.is_empty() || key.contains('.') {
                return Err(ScatterError::Configuration(format!(
                    "scatter key '{key}' is not a single path segment"
                )));
            }
            if !seen.insert(key.as_str()) {
                return Err(ScatterError::DuplicateKey {
                    builder: self.display_name(),
                    key: key.clone(),
                });
            }
        }
        Ok(Some(keys))
    }

    fn create_instance(
        &self,
        key: &str,
        registry: &NamespaceRegistry,
        data: &DataManager,
    ) -> Result<ScatterInstance, ScatterError> {
        let scope = self.instance_scope(key);
        registry.open_scope(scope.clone(), &self.scope)?;

        let path = match self.rebase_namespaces(key, &scope, registry) {
            Ok(path) => path,
            Err(e) => {
                registry.close_scope(&scope);
                return Err(e);
            }
        };

        let mut instance = ScatterInstance {
            key: key.to_string(),
            scope,
            key_var: VariableKey::new(path.clone(), self.map().output_name.clone()),
            path,
            key_declared: false,
            disciplines: Vec::new(),
            children: Vec::new(),
        };
        match self.populate(&mut instance, registry, data) {
            Ok(()) => {
                debug!("Created instance {} at {}", key, instance.path);
                Ok(instance)
            }
            Err(e) => {
                instance.destroy(registry, data);
                Err(e)
            }
        }
    }

    fn rebase_namespaces(
        &self,
        key: &str,
        scope: &ScopeId,
        registry: &NamespaceRegistry,
    ) -> Result<NamespacePath, ScatterError> {
        let map = self.map();
        let parent = registry.resolve(&self.scope, &map.scatter_ns)?;
        let mut instance_path = None;
        for id in map.rebased_namespaces() {
            let path = registry.rebase(scope, id, &parent, key)?;
            if *id == map.scatter_ns {
                instance_path = Some(path);
            }
        }
        Ok(instance_path.unwrap_or_else(|| parent.child(key)))
    }

    fn populate(
        &self,
        instance: &mut ScatterInstance,
        registry: &NamespaceRegistry,
        data: &DataManager,
    ) -> Result<(), ScatterError> {
        data.declare(instance.key_var.clone(), &key_spec(), Writer::Host)?;
        instance.key_declared = true;
        data.write(&instance.key_var, Value::from(instance.key.as_str()), Writer::Host)?;

        for element in &self.blueprint.elements {
            match element {
                Element::Discipline(template) => {
                    let mut discipline = DisciplineInstance::new(
                        Arc::clone(template),
                        instance.key.clone(),
                        instance.scope.clone(),
                        instance.path.child(template.name()),
                    );
                    discipline.configure(registry, data)?;
                    instance.disciplines.push(Arc::new(InstanceHandle::new(discipline)));
                }
                Element::Scatter(blueprint) => {
                    instance
                        .children
                        .push(ScatterBuilder::new(Arc::clone(blueprint), instance.scope.clone())?);
                }
            }
        }
        Ok(())
    }
}

fn driver_spec() -> VariableSpec {
    VariableSpec::of(TypeSpec::List(Some(Box::new(TypeSpec::Scalar(TypeTag::String))))).into_shared()
}

fn key_spec() -> VariableSpec {
    VariableSpec::of(TypeSpec::Scalar(TypeTag::String)).into_shared()
}

/// Keys carried by a driving value
///
/// A list must hold strings only. A dataframe contributes the
/// `scenario_name` of every row whose `selected_scenario` is true.
///
/// # Errors
/// Description of the unsupported shape.
pub fn driving_keys(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("list element {} is not a string", item.type_tag()))
            })
            .collect(),
        Value::DataFrame(df) => {
            let names = df
                .column(SCENARIO_NAME_COLUMN)
                .ok_or_else(|| format!("dataframe lacks '{SCENARIO_NAME_COLUMN}'"))?;
            let selected = df
                .column(SELECTED_SCENARIO_COLUMN)
                .ok_or_else(|| format!("dataframe lacks '{SELECTED_SCENARIO_COLUMN}'"))?;
            names
                .iter()
                .zip(selected)
                .filter_map(|(name, sel)| match sel.as_bool() {
                    Some(true) => Some(
                        name.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| format!("'{SCENARIO_NAME_COLUMN}' must hold strings")),
                    ),
                    Some(false) => None,
                    None => Some(Err(format!("'{SELECTED_SCENARIO_COLUMN}' must hold booleans"))),
                })
                .collect()
        }
        other => Err(format!("expected list or dataframe, found {}", other.type_tag())),
    }
}
