//! Process composition and execution
//!
//! A [`Process`] owns the namespace registry and the data manager for its
//! whole lifetime and hands them explicitly to every builder and instance.
//! Configuration walks the node tree outer-to-inner; execution runs in
//! rounds planned by [`crate::scheduler`].

use chrono::{DateTime, Utc};
use fanout_data::{DataManager, Value, VariableDescriptor, VariableKey, Writer};
use fanout_discipline::{
    DisciplineInstance, DisciplineTemplate, ExecutionTicket, InstanceHandle, InstanceState,
    TemplateRegistry,
};
use fanout_namespace::{NamespaceId, NamespacePath, NamespaceRegistry, ScopeId};
use fanout_scatter::{
    GatherAggregator, GatherMode, GatherOutcome, GatherResult, ReconcileReport, ScatterBlueprint,
    ScatterBuilder,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::autogather::{live_keys, AutoGather};
use crate::config::{EngineConfig, ProcessConfig};
use crate::error::ProcessError;
use crate::scheduler::{schedule, Slot};

/// Top-level node of a process definition
#[derive(Debug, Clone)]
pub enum ProcessNode {
    /// Single discipline instance at the study root
    Discipline(Arc<DisciplineTemplate>),
    /// Scatter node
    Scatter(ScatterBlueprint),
}

impl ProcessNode {
    /// Node name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Discipline(template) => template.name(),
            Self::Scatter(blueprint) => &blueprint.name,
        }
    }
}

/// Root namespaces plus top-level nodes
#[derive(Debug, Clone, Default)]
pub struct ProcessDefinition {
    namespaces: IndexMap<NamespaceId, NamespacePath>,
    nodes: Vec<ProcessNode>,
}

impl ProcessDefinition {
    /// Empty definition
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a namespace in the root scope
    #[must_use]
    pub fn with_namespace(mut self, id: impl Into<NamespaceId>, path: NamespacePath) -> Self {
        self.namespaces.insert(id.into(), path);
        self
    }

    /// Add a top-level discipline
    #[must_use]
    pub fn with_discipline(self, template: Arc<DisciplineTemplate>) -> Self {
        self.with_node(ProcessNode::Discipline(template))
    }

    /// Add a top-level scatter
    #[must_use]
    pub fn with_scatter(self, blueprint: ScatterBlueprint) -> Self {
        self.with_node(ProcessNode::Scatter(blueprint))
    }

    /// Add a node
    #[must_use]
    pub fn with_node(mut self, node: ProcessNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Root namespaces
    #[must_use]
    pub fn namespaces(&self) -> &IndexMap<NamespaceId, NamespacePath> {
        &self.namespaces
    }

    /// Top-level nodes
    #[must_use]
    pub fn nodes(&self) -> &[ProcessNode] {
        &self.nodes
    }
}

#[derive(Debug)]
enum Node {
    Discipline(Arc<InstanceHandle>),
    Scatter(ScatterBuilder),
}

/// Configuration error attributed to one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeError {
    /// Builder or instance display name
    pub node: String,
    /// Cause
    pub error: ProcessError,
}

/// Outcome of [`Process::configure`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigureSummary {
    /// Reconciliation report per builder, outer before inner
    pub reports: Vec<ReconcileReport>,
    /// Top-level disciplines configured by this pass
    pub configured: Vec<String>,
    /// Nodes whose configuration failed; siblings are unaffected
    pub errors: Vec<NodeError>,
}

impl ConfigureSummary {
    /// No node failed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Report of one builder
    #[must_use]
    pub fn report(&self, builder: &str) -> Option<&ReconcileReport> {
        self.reports.iter().find(|r| r.builder == builder)
    }
}

/// Failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedInstance {
    /// Instance display name
    pub instance: String,
    /// Behaviour error
    pub message: String,
}

/// Outcome of [`Process::execute`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    /// Rounds that ran at least one instance
    pub rounds: usize,
    /// Successful runs in completion order
    pub executed: Vec<String>,
    /// Failed runs in completion order
    pub failed: Vec<FailedInstance>,
    /// Instances left waiting on inputs or on a failed producer
    pub blocked: Vec<String>,
    /// Start of execution
    pub started_at: DateTime<Utc>,
    /// End of execution
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Nothing failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Turn the first failure into an error
    ///
    /// # Errors
    /// [`ProcessError::ExecutionFailure`] if any run failed.
    pub fn into_result(self) -> Result<Self, ProcessError> {
        match self.failed.first() {
            Some(failure) => Err(ProcessError::ExecutionFailure {
                instance: failure.instance.clone(),
                message: failure.message.clone(),
            }),
            None => Ok(self),
        }
    }
}

/// Composed process: registry, data manager and node tree
#[derive(Debug)]
pub struct Process {
    config: EngineConfig,
    study: NamespacePath,
    registry: Arc<NamespaceRegistry>,
    data: Arc<DataManager>,
    nodes: RwLock<Vec<Node>>,
    gather: GatherAggregator,
    notify: Notify,
    autogathered: Mutex<BTreeSet<VariableKey>>,
}

impl Process {
    /// Register root namespaces and instantiate top-level nodes
    ///
    /// Nothing is configured yet; call [`Process::configure`].
    ///
    /// # Errors
    /// Invalid engine config, duplicate node names or an invalid build map.
    pub fn new(config: EngineConfig, definition: ProcessDefinition) -> Result<Self, ProcessError> {
        config.validate()?;
        let study = config.study_path()?;
        let registry = Arc::new(NamespaceRegistry::new());
        let data = Arc::new(DataManager::new());
        let root = ScopeId::root();

        for (id, path) in definition.namespaces {
            registry.add_ns(&root, id, path)?;
        }

        let mut names = HashSet::new();
        let mut nodes = Vec::with_capacity(definition.nodes.len());
        for node in definition.nodes {
            if !names.insert(node.name().to_string()) {
                return Err(ProcessError::Configuration(format!(
                    "duplicate node name '{}'",
                    node.name()
                )));
            }
            nodes.push(match node {
                ProcessNode::Discipline(template) => {
                    let local_ns = study.child(template.name());
                    let key = template.name().to_string();
                    let instance = DisciplineInstance::new(template, key, root.clone(), local_ns);
                    Node::Discipline(Arc::new(InstanceHandle::new(instance)))
                }
                ProcessNode::Scatter(blueprint) => {
                    Node::Scatter(ScatterBuilder::new(Arc::new(blueprint), root.clone())?)
                }
            });
        }

        info!("Process {} created with {} nodes", study, nodes.len());
        Ok(Self {
            gather: GatherAggregator::new(Arc::clone(&registry), Arc::clone(&data)),
            config,
            study,
            registry,
            data,
            nodes: RwLock::new(nodes),
            notify: Notify::new(),
            autogathered: Mutex::new(BTreeSet::new()),
        })
    }

    /// Build from configuration documents
    ///
    /// # Errors
    /// Same as [`ProcessConfig::into_definition`] and [`Process::new`].
    pub fn from_config(
        config: EngineConfig,
        process: ProcessConfig,
        templates: &TemplateRegistry,
    ) -> Result<Self, ProcessError> {
        let definition = process.into_definition(templates)?;
        Self::new(config, definition)
    }

    /// Engine settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Root path of the study
    #[inline]
    #[must_use]
    pub fn study_path(&self) -> &NamespacePath {
        &self.study
    }

    /// Namespace registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.registry
    }

    /// Data manager
    #[inline]
    #[must_use]
    pub fn data(&self) -> &Arc<DataManager> {
        &self.data
    }

    /// Address of `name` in root-scope namespace `ns`
    ///
    /// # Errors
    /// [`ProcessError::Namespace`] if `ns` is unknown.
    pub fn key(&self, ns: &str, name: &str) -> Result<VariableKey, ProcessError> {
        let path = self.registry.resolve(&ScopeId::root(), &NamespaceId::new(ns))?;
        Ok(VariableKey::new(path, name))
    }

    /// Declare a host-owned variable in root-scope namespace `ns`
    ///
    /// # Errors
    /// Unknown namespace, invalid descriptor or conflicting declaration.
    pub fn declare(
        &self,
        ns: &str,
        name: &str,
        descriptor: &VariableDescriptor,
    ) -> Result<VariableKey, ProcessError> {
        let key = self.key(ns, name)?;
        let spec = descriptor.validate(name)?;
        self.data.declare(key.clone(), &spec, Writer::Host)?;
        Ok(key)
    }

    /// Write a value as the host
    ///
    /// # Errors
    /// Undeclared key or type mismatch.
    pub fn write(&self, key: &VariableKey, value: impl Into<Value>) -> Result<u64, ProcessError> {
        Ok(self.data.write(key, value.into(), Writer::Host)?)
    }

    /// Write `name` in root-scope namespace `ns` as the host
    ///
    /// # Errors
    /// Unknown namespace, undeclared key or type mismatch.
    pub fn set_value(&self, ns: &str, name: &str, value: impl Into<Value>) -> Result<u64, ProcessError> {
        let key = self.key(ns, name)?;
        self.write(&key, value)
    }

    /// Read a value
    ///
    /// # Errors
    /// [`fanout_data::DataError::Undeclared`] or
    /// [`fanout_data::DataError::ValueNotSet`].
    pub fn read(&self, key: &VariableKey) -> Result<Value, ProcessError> {
        Ok(self.data.read(key)?)
    }

    /// Configure every node, outer builders before the ones nested in them
    ///
    /// A failing node keeps its last good configuration and does not stop
    /// its siblings. Call again after writing new driving values.
    ///
    /// Gathered outputs of builders that no longer exist are released and
    /// settled gathers are rewritten.
    pub fn configure(&self) -> ConfigureSummary {
        let mut summary = ConfigureSummary::default();
        let mut nodes = self.nodes.write();
        for node in nodes.iter_mut() {
            match node {
                Node::Discipline(handle) => {
                    let mut instance = handle.lock();
                    if instance.state() != InstanceState::Pending {
                        continue;
                    }
                    match instance.configure(&self.registry, &self.data) {
                        Ok(()) => summary.configured.push(instance.display_name()),
                        Err(e) => {
                            warn!("Configuration of {} failed: {}", instance.display_name(), e);
                            summary.errors.push(NodeError {
                                node: instance.display_name(),
                                error: e.into(),
                            });
                        }
                    }
                }
                Node::Scatter(builder) => {
                    configure_tree(builder, &self.registry, &self.data, &mut summary);
                }
            }
        }
        drop(nodes);
        if let Err(e) = self.autogather() {
            warn!("Refreshing gathered outputs failed: {}", e);
        }
        self.notify.notify_waiters();
        summary
    }

    /// Every live instance in schedule order
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<InstanceHandle>> {
        let nodes = self.nodes.read();
        let mut out = Vec::new();
        for node in nodes.iter() {
            match node {
                Node::Discipline(handle) => out.push(Arc::clone(handle)),
                Node::Scatter(builder) => out.extend(builder.handles()),
            }
        }
        out
    }

    /// State of every live instance by display name
    #[must_use]
    pub fn states(&self) -> IndexMap<String, InstanceState> {
        self.handles()
            .iter()
            .map(|h| {
                let instance = h.lock();
                (instance.display_name(), instance.state())
            })
            .collect()
    }

    /// Run rounds until no instance is runnable
    ///
    /// Behaviour failures mark only the failing instance; they are listed
    /// in the report rather than returned as errors.
    ///
    /// # Errors
    /// [`ProcessError::RoundLimit`] if the process keeps going stale, or a
    /// data manager error while auto-gathering.
    pub async fn execute(&self) -> Result<ExecutionReport, ProcessError> {
        let started_at = Utc::now();
        let permits = Arc::new(Semaphore::new(self.config.max_parallel_instances));
        let mut report = ExecutionReport {
            rounds: 0,
            executed: Vec::new(),
            failed: Vec::new(),
            blocked: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        loop {
            let handles = self.handles();
            let planned = self.plan(&handles)?;
            if planned.is_empty() {
                break;
            }
            if report.rounds == self.config.max_rounds {
                return Err(ProcessError::RoundLimit(report.rounds));
            }
            report.rounds += 1;
            let span = info_span!("execute", round = report.rounds);
            self.run_round(&handles, planned, &permits, &mut report)
                .instrument(span)
                .await?;
        }

        self.autogather()?;
        report.blocked = self
            .handles()
            .iter()
            .filter_map(|h| {
                let instance = h.lock();
                matches!(
                    instance.state(),
                    InstanceState::Pending
                        | InstanceState::Configured
                        | InstanceState::Ready
                        | InstanceState::Stale
                )
                .then(|| instance.display_name())
            })
            .collect();
        report.finished_at = Utc::now();
        info!(
            "Execution finished after {} rounds: {} executed, {} failed, {} blocked",
            report.rounds,
            report.executed.len(),
            report.failed.len(),
            report.blocked.len()
        );
        self.notify.notify_waiters();
        Ok(report)
    }

    async fn run_round(
        &self,
        handles: &[Arc<InstanceHandle>],
        planned: Vec<(usize, ExecutionTicket)>,
        permits: &Arc<Semaphore>,
        report: &mut ExecutionReport,
    ) -> Result<(), ProcessError> {
        debug!("Running {} instances", planned.len());

        let indices: Vec<usize> = planned.iter().map(|(idx, _)| *idx).collect();
        let mut tasks = JoinSet::new();
        for (idx, ticket) in planned {
            let permits = Arc::clone(permits);
            let task = tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await.ok();
                    (idx, ticket.run().await)
                }
                .in_current_span(),
            );
            handles[idx].track(task);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, run)) => {
                    let handle = &handles[idx];
                    handle.untrack();
                    {
                        let mut instance = handle.lock();
                        match instance.commit(run, &self.data)? {
                            InstanceState::Executed => report.executed.push(instance.display_name()),
                            InstanceState::Failed => report.failed.push(FailedInstance {
                                instance: instance.display_name(),
                                message: instance.failure().unwrap_or_default().to_string(),
                            }),
                            _ => {}
                        }
                    }
                    self.notify.notify_waiters();
                }
                Err(e) if e.is_cancelled() => debug!("Task cancelled: {}", e),
                Err(e) => warn!("Task panicked: {}", e),
            }
        }

        for idx in indices {
            let mut instance = handles[idx].lock();
            if instance.state().is_runnable() {
                let message = "task ended without a result";
                instance.abandon(message)?;
                report.failed.push(FailedInstance {
                    instance: instance.display_name(),
                    message: message.to_string(),
                });
            }
        }

        self.autogather()?;
        Ok(())
    }

    fn plan(
        &self,
        handles: &[Arc<InstanceHandle>],
    ) -> Result<Vec<(usize, ExecutionTicket)>, ProcessError> {
        let mut slots = Vec::with_capacity(handles.len());
        for handle in handles {
            let mut instance = handle.lock();
            instance.refresh(&self.data)?;
            slots.push(Slot::of(&instance));
        }
        let plan = schedule(&slots);
        for idx in &plan.deferred {
            debug!(
                "Deferring {}: shared output already written this round",
                handles[*idx].lock().display_name()
            );
        }
        plan.runnable
            .into_iter()
            .map(|idx| Ok((idx, handles[idx].lock().prepare(&self.data)?)))
            .collect()
    }

    fn autogather(&self) -> Result<usize, ProcessError> {
        let nodes = self.nodes.read();
        let mut live = BTreeSet::new();
        for node in nodes.iter() {
            if let Node::Scatter(builder) = node {
                live_keys(builder, &self.registry, &mut live);
            }
        }

        let mut declared = self.autogathered.lock();
        let mut pass = AutoGather {
            registry: &self.registry,
            data: &self.data,
            aggregator: &self.gather,
            declared: &mut declared,
        };
        let released = pass.prune(&live);
        let mut written = 0;
        for node in nodes.iter() {
            if let Node::Scatter(builder) = node {
                written += pass.run(builder)?;
            }
        }
        Ok(released + written)
    }

    /// Gather `var` over a builder with the configured default mode
    ///
    /// `builder` is a display name: `multi_scenarios` at the top level,
    /// `multi_scenarios/scenario1/inner` for a nested one.
    ///
    /// # Errors
    /// [`ProcessError::UnknownNode`] or any gather error.
    pub fn gather(&self, builder: &str, var: &str) -> Result<GatherOutcome, ProcessError> {
        let mode = if self.config.strict_gather {
            GatherMode::Strict
        } else {
            GatherMode::Lenient
        };
        self.gather_with(builder, var, mode)
    }

    /// Gather with an explicit mode
    ///
    /// # Errors
    /// [`ProcessError::UnknownNode`] or any gather error.
    pub fn gather_with(
        &self,
        builder: &str,
        var: &str,
        mode: GatherMode,
    ) -> Result<GatherOutcome, ProcessError> {
        let nodes = self.nodes.read();
        let found = find_builder(&nodes, builder)
            .ok_or_else(|| ProcessError::UnknownNode(builder.to_string()))?;
        Ok(self.gather.gather(found, var, mode)?)
    }

    /// Suspend until the gather is no longer pending
    ///
    /// Woken after every completed run and every configure pass.
    ///
    /// # Errors
    /// Same as [`Process::gather_with`].
    pub async fn wait_for_gather(
        &self,
        builder: &str,
        var: &str,
        mode: GatherMode,
    ) -> Result<GatherResult, ProcessError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let GatherOutcome::Ready(result) = self.gather_with(builder, var, mode)? {
                return Ok(result);
            }
            notified.await;
        }
    }

    /// Put every failed instance back to `configured`
    ///
    /// Returns the display names reset. The engine never does this on its
    /// own.
    ///
    /// # Errors
    /// Only on an internal lifecycle violation.
    pub fn reset_failed(&self) -> Result<Vec<String>, ProcessError> {
        let mut reset = Vec::new();
        for handle in self.handles() {
            let mut instance = handle.lock();
            if instance.state() == InstanceState::Failed {
                instance.reset()?;
                reset.push(instance.display_name());
            }
        }
        Ok(reset)
    }

    /// Destroy every instance and release everything the process declared
    pub fn shutdown(&self) {
        let mut nodes = self.nodes.write();
        for node in nodes.iter_mut() {
            match node {
                Node::Discipline(handle) => {
                    handle.cancel();
                    handle.lock().teardown(&self.data);
                }
                Node::Scatter(builder) => builder.teardown(&self.registry, &self.data),
            }
        }
        for key in std::mem::take(&mut *self.autogathered.lock()) {
            if let Err(e) = self.data.undeclare(&key) {
                debug!("Gathered variable {}: {}", key, e);
            }
        }
        drop(nodes);
        info!("Process {} shut down", self.study);
        self.notify.notify_waiters();
    }
}

fn configure_tree(
    builder: &mut ScatterBuilder,
    registry: &NamespaceRegistry,
    data: &DataManager,
    summary: &mut ConfigureSummary,
) {
    match builder.configure(registry, data) {
        Ok(report) => summary.reports.push(report),
        Err(e) => {
            warn!("Configuration of {} failed: {}", builder.display_name(), e);
            summary.errors.push(NodeError {
                node: builder.display_name(),
                error: e.into(),
            });
        }
    }
    for instance in builder.instances_mut() {
        for child in instance.children_mut() {
            configure_tree(child, registry, data, summary);
        }
    }
}

fn find_builder<'a>(nodes: &'a [Node], name: &str) -> Option<&'a ScatterBuilder> {
    nodes.iter().find_map(|node| match node {
        Node::Scatter(builder) => find_in(builder, name),
        Node::Discipline(_) => None,
    })
}

fn find_in<'a>(builder: &'a ScatterBuilder, name: &str) -> Option<&'a ScatterBuilder> {
    if builder.display_name() == name {
        return Some(builder);
    }
    builder
        .instances()
        .flat_map(|instance| instance.children())
        .find_map(|child| find_in(child, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_test_utils::affine_template;

    #[test]
    fn duplicate_node_names_rejected() {
        let definition = ProcessDefinition::new()
            .with_discipline(affine_template("Disc", 1.0, 0.0))
            .with_discipline(affine_template("Disc", 2.0, 0.0));
        let err = Process::new(EngineConfig::default(), definition).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn top_level_discipline_lives_under_study() {
        let definition = ProcessDefinition::new().with_discipline(affine_template("Disc", 2.0, 3.0));
        let process =
            Process::new(EngineConfig::default().with_study_name("MyCase"), definition).unwrap();
        let summary = process.configure();
        assert!(summary.is_clean());
        assert_eq!(summary.configured, vec!["Disc"]);

        let x = VariableKey::new("MyCase.Disc".parse().unwrap(), "x");
        assert!(process.data().contains(&x));
        assert_eq!(process.states()["Disc"], InstanceState::Configured);
    }

    #[test]
    fn unknown_builder_in_gather() {
        let process = Process::new(EngineConfig::default(), ProcessDefinition::new()).unwrap();
        assert!(matches!(
            process.gather("missing", "o"),
            Err(ProcessError::UnknownNode(_))
        ));
    }

    #[tokio::test]
    async fn top_level_discipline_executes() {
        let definition = ProcessDefinition::new().with_discipline(affine_template("Disc", 2.0, 3.0));
        let process = Process::new(EngineConfig::default(), definition).unwrap();
        process.configure();

        let x = VariableKey::new("study.Disc".parse().unwrap(), "x");
        let report = process.execute().await.unwrap();
        assert_eq!(report.rounds, 0);
        assert_eq!(report.blocked, vec!["Disc"]);

        process.write(&x, 4.0).unwrap();
        let report = process.execute().await.unwrap();
        assert_eq!(report.executed, vec!["Disc"]);
        assert!(report.blocked.is_empty());
        let o = VariableKey::new("study.Disc".parse().unwrap(), "o");
        assert_eq!(process.read(&o).unwrap(), Value::Float(11.0));
    }
}
