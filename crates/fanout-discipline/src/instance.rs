//! Discipline instances
//!
//! One [`DisciplineInstance`] per template per scatter element. The
//! instance owns its lifecycle state and the keys it declared; values live
//! in the [`DataManager`].
//!
//! Execution is split in three steps so no lock is held while the
//! behaviour runs:
//! 1. [`DisciplineInstance::prepare`] snapshots the inputs into an
//!    [`ExecutionTicket`]
//! 2. [`ExecutionTicket::run`] awaits the behaviour
//! 3. [`DisciplineInstance::commit`] writes outputs, unless the instance was
//!    destroyed in the meantime

use chrono::{DateTime, Utc};
use fanout_data::{DataError, DataManager, OwnerId, VariableKey, VariableSpec, Writer};
use fanout_namespace::{NamespacePath, NamespaceRegistry, ScopeId};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::DisciplineError;
use crate::state::{validate_transition, InstanceState};
use crate::template::{DisciplineBehavior, DisciplineTemplate, RunContext, ValueMap};

/// Resolved declaration of one input or output
#[derive(Debug, Clone, PartialEq)]
pub struct VariableBinding {
    /// Short name
    pub name: String,
    /// Address in the data manager
    pub key: VariableKey,
    /// Validated declaration
    pub spec: VariableSpec,
}

/// Outcome of the last execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Outputs written
    Succeeded,
    /// Behaviour or output write failed
    Failed(String),
}

/// Timing and outcome of the last execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Behaviour start
    pub started_at: DateTime<Utc>,
    /// Commit time
    pub finished_at: DateTime<Utc>,
    /// Result
    pub outcome: RunOutcome,
}

/// Snapshot handed to the scheduler for one run
pub struct ExecutionTicket {
    behavior: Arc<dyn DisciplineBehavior>,
    ctx: RunContext,
    inputs: ValueMap,
    revisions: IndexMap<String, u64>,
    started_at: DateTime<Utc>,
}

impl ExecutionTicket {
    /// Instance context
    #[inline]
    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Await the behaviour
    pub async fn run(self) -> CompletedRun {
        let result = self.behavior.run(&self.ctx, self.inputs).await;
        CompletedRun {
            result,
            revisions: self.revisions,
            started_at: self.started_at,
        }
    }
}

/// Behaviour result waiting to be committed
#[derive(Debug)]
pub struct CompletedRun {
    result: anyhow::Result<ValueMap>,
    revisions: IndexMap<String, u64>,
    started_at: DateTime<Utc>,
}

impl CompletedRun {
    /// Behaviour succeeded
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Live copy of a template bound to one namespace context
#[derive(Debug)]
pub struct DisciplineInstance {
    id: OwnerId,
    template: Arc<DisciplineTemplate>,
    key: String,
    scope: ScopeId,
    local_ns: NamespacePath,
    state: InstanceState,
    inputs: IndexMap<String, VariableBinding>,
    outputs: IndexMap<String, VariableBinding>,
    consumed: IndexMap<String, u64>,
    last_run: Option<ExecutionRecord>,
}

impl DisciplineInstance {
    /// Bind `template` to `scope`; the instance starts `pending`
    #[must_use]
    pub fn new(
        template: Arc<DisciplineTemplate>,
        key: impl Into<String>,
        scope: ScopeId,
        local_ns: NamespacePath,
    ) -> Self {
        Self {
            id: OwnerId::new(),
            template,
            key: key.into(),
            scope,
            local_ns,
            state: InstanceState::Pending,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            consumed: IndexMap::new(),
            last_run: None,
        }
    }

    /// Owner identity used for writes
    #[inline]
    #[must_use]
    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// Scatter key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Template
    #[inline]
    #[must_use]
    pub fn template(&self) -> &Arc<DisciplineTemplate> {
        &self.template
    }

    /// Namespace scope
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Local namespace (`<instance path>.<template name>`)
    #[inline]
    #[must_use]
    pub fn local_ns(&self) -> &NamespacePath {
        &self.local_ns
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// `<scope>/<template>` for logs and reports (`outer/s1/inner/x1/Disc`),
    /// or the bare template name at the root
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.scope.is_root() {
            self.template.name().to_string()
        } else {
            format!("{}/{}", self.scope, self.template.name())
        }
    }

    /// Resolved inputs
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &IndexMap<String, VariableBinding> {
        &self.inputs
    }

    /// Resolved outputs
    #[inline]
    #[must_use]
    pub fn outputs(&self) -> &IndexMap<String, VariableBinding> {
        &self.outputs
    }

    /// Last execution record
    #[inline]
    #[must_use]
    pub fn last_run(&self) -> Option<&ExecutionRecord> {
        self.last_run.as_ref()
    }

    /// Address of output `name`
    #[must_use]
    pub fn output_key(&self, name: &str) -> Option<&VariableKey> {
        self.outputs.get(name).map(|b| &b.key)
    }

    fn transition(&mut self, to: InstanceState) -> Result<(), DisciplineError> {
        validate_transition(self.state, to)?;
        debug!("Instance {}: {} -> {}", self.display_name(), self.state, to);
        self.state = to;
        Ok(())
    }

    /// Resolve namespaces and declare every variable
    ///
    /// All-or-nothing: on error every declaration made by this call is
    /// undone and the instance stays `pending`. Calling it on a configured
    /// instance is a no-op.
    ///
    /// # Errors
    /// Namespace resolution, descriptor validation or conflicting declaration.
    pub fn configure(
        &mut self,
        registry: &NamespaceRegistry,
        data: &DataManager,
    ) -> Result<(), DisciplineError> {
        if self.state != InstanceState::Pending {
            return Ok(());
        }

        let inputs = self.resolve_all(registry, self.template.inputs())?;
        let outputs = self.resolve_all(registry, self.template.outputs())?;

        let writer = Writer::Owner(self.id);
        let mut declared: Vec<&VariableKey> = Vec::new();
        for binding in inputs.values().chain(outputs.values()) {
            if let Err(e) = data.declare(binding.key.clone(), &binding.spec, writer) {
                for key in declared {
                    if let Err(undo) = data.undeclare(key) {
                        debug!("Rollback of {}: {}", key, undo);
                    }
                }
                return Err(e.into());
            }
            declared.push(&binding.key);
        }

        self.inputs = inputs;
        self.outputs = outputs;
        self.transition(InstanceState::Configured)
    }

    fn resolve_all(
        &self,
        registry: &NamespaceRegistry,
        descriptors: &IndexMap<String, fanout_data::VariableDescriptor>,
    ) -> Result<IndexMap<String, VariableBinding>, DisciplineError> {
        descriptors
            .iter()
            .map(|(name, desc)| {
                let spec = desc.validate(name)?;
                let namespace = match &desc.namespace {
                    Some(id) => registry.resolve(&self.scope, id)?,
                    None => self.local_ns.clone(),
                };
                Ok((
                    name.clone(),
                    VariableBinding {
                        name: name.clone(),
                        key: VariableKey::new(namespace, name.clone()),
                        spec,
                    },
                ))
            })
            .collect()
    }

    /// Every required input holds a value
    #[must_use]
    pub fn inputs_present(&self, data: &DataManager) -> bool {
        self.inputs
            .values()
            .all(|b| b.spec.optional || data.entry(&b.key).is_some_and(|e| e.is_set()))
    }

    /// Some input was rewritten (or vanished) since the last execution
    #[must_use]
    pub fn inputs_changed(&self, data: &DataManager) -> bool {
        self.inputs.values().any(|b| {
            let current = data.entry(&b.key).filter(|e| e.is_set()).map(|e| e.revision);
            current != self.consumed.get(&b.name).copied()
        })
    }

    /// Re-evaluate readiness against the data manager
    ///
    /// - `configured -> ready` once required inputs are present
    /// - `ready -> configured` when a required input disappears
    /// - `executed -> stale` when an input moved since it was consumed
    /// - `stale -> configured` when a required input disappears
    ///
    /// Returns the new state when it changed.
    ///
    /// # Errors
    /// Only on an internal lifecycle violation.
    pub fn refresh(&mut self, data: &DataManager) -> Result<Option<InstanceState>, DisciplineError> {
        let present = self.inputs_present(data);
        let next = match self.state {
            InstanceState::Configured if present => Some(InstanceState::Ready),
            InstanceState::Ready | InstanceState::Stale if !present => {
                Some(InstanceState::Configured)
            }
            InstanceState::Executed if self.inputs_changed(data) => Some(InstanceState::Stale),
            _ => None,
        };
        if let Some(to) = next {
            self.transition(to)?;
        }
        Ok(next)
    }

    /// Snapshot inputs for a run
    ///
    /// # Errors
    /// - [`DisciplineError::IllegalTransition`] unless `ready` or `stale`
    /// - [`DisciplineError::Data`] if a required input cannot be read
    pub fn prepare(&self, data: &DataManager) -> Result<ExecutionTicket, DisciplineError> {
        if !self.state.is_runnable() {
            return Err(DisciplineError::IllegalTransition {
                from: self.state,
                to: InstanceState::Executed,
            });
        }
        let mut inputs = ValueMap::new();
        let mut revisions = IndexMap::new();
        for binding in self.inputs.values() {
            let Some(entry) = data.entry(&binding.key) else {
                return Err(DataError::Undeclared(binding.key.full_name()).into());
            };
            match entry.value {
                Some(value) => {
                    inputs.insert(binding.name.clone(), value);
                    revisions.insert(binding.name.clone(), entry.revision);
                }
                None if binding.spec.optional => {}
                None => return Err(DataError::ValueNotSet(binding.key.full_name()).into()),
            }
        }
        Ok(ExecutionTicket {
            behavior: self.template.behavior(),
            ctx: RunContext {
                instance_key: self.key.clone(),
                template: self.template.name().to_string(),
                local_ns: self.local_ns.clone(),
            },
            inputs,
            revisions,
            started_at: Utc::now(),
        })
    }

    /// Apply a finished run
    ///
    /// A destroyed instance discards the result. Otherwise outputs are
    /// checked as a whole before any is written; a behaviour error, an
    /// undeclared output name or a shape mismatch marks the instance
    /// `failed`. Returns the resulting state.
    ///
    /// # Errors
    /// Only on an internal lifecycle violation.
    pub fn commit(
        &mut self,
        run: CompletedRun,
        data: &DataManager,
    ) -> Result<InstanceState, DisciplineError> {
        if self.state == InstanceState::Destroyed {
            debug!("Discarding result of destroyed instance {}", self.display_name());
            return Ok(self.state);
        }

        let outcome = run
            .result
            .map_err(|e| format!("{e:#}"))
            .and_then(|outputs| self.write_outputs(outputs, data));

        let state = match &outcome {
            Ok(()) => {
                self.consumed = run.revisions;
                // Inputs this instance also writes must not make it stale
                for binding in self.inputs.values() {
                    if self.outputs.values().any(|o| o.key == binding.key) {
                        if let Some(rev) = data.revision(&binding.key) {
                            self.consumed.insert(binding.name.clone(), rev);
                        }
                    }
                }
                InstanceState::Executed
            }
            Err(message) => {
                warn!("Instance {} failed: {}", self.display_name(), message);
                InstanceState::Failed
            }
        };
        self.transition(state)?;
        self.last_run = Some(ExecutionRecord {
            started_at: run.started_at,
            finished_at: Utc::now(),
            outcome: match outcome {
                Ok(()) => RunOutcome::Succeeded,
                Err(message) => RunOutcome::Failed(message),
            },
        });
        Ok(state)
    }

    fn write_outputs(&self, outputs: ValueMap, data: &DataManager) -> Result<(), String> {
        let mut staged = Vec::with_capacity(outputs.len());
        for (name, value) in outputs {
            let binding = self
                .outputs
                .get(&name)
                .ok_or_else(|| format!("undeclared output '{name}'"))?;
            binding
                .spec
                .type_spec
                .check(&value)
                .map_err(|reason| format!("output '{name}': {reason}"))?;
            staged.push((&binding.key, value));
        }
        for (key, value) in staged {
            data.write(key, value, Writer::Owner(self.id))
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Failure message of the last run, if it failed
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match self.last_run.as_ref().map(|r| &r.outcome) {
            Some(RunOutcome::Failed(message)) if self.state == InstanceState::Failed => {
                Some(message)
            }
            _ => None,
        }
    }

    /// Mark a run that never committed (aborted or panicked task) as failed
    ///
    /// # Errors
    /// [`DisciplineError::IllegalTransition`] unless `ready` or `stale`.
    pub fn abandon(&mut self, message: impl Into<String>) -> Result<(), DisciplineError> {
        self.transition(InstanceState::Failed)?;
        let now = Utc::now();
        self.last_run = Some(ExecutionRecord {
            started_at: now,
            finished_at: now,
            outcome: RunOutcome::Failed(message.into()),
        });
        Ok(())
    }

    /// Put a failed instance back to `configured`
    ///
    /// # Errors
    /// [`DisciplineError::IllegalTransition`] unless `failed`.
    pub fn reset(&mut self) -> Result<(), DisciplineError> {
        if self.state != InstanceState::Failed {
            return Err(DisciplineError::IllegalTransition {
                from: self.state,
                to: InstanceState::Configured,
            });
        }
        self.consumed.clear();
        self.transition(InstanceState::Configured)
    }

    /// Undeclare every variable and mark the instance destroyed
    ///
    /// Returns the number of entries actually removed from the data manager
    /// (shared entries still declared elsewhere survive).
    pub fn teardown(&mut self, data: &DataManager) -> usize {
        if self.state == InstanceState::Destroyed {
            return 0;
        }
        let mut removed = 0;
        for binding in self.inputs.values().chain(self.outputs.values()) {
            match data.undeclare(&binding.key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => debug!("Teardown of {}: {}", self.display_name(), e),
            }
        }
        debug!("Instance {}: {} -> destroyed", self.display_name(), self.state);
        self.state = InstanceState::Destroyed;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_data::{Value, VariableDescriptor};

    fn doubler() -> Arc<DisciplineTemplate> {
        Arc::new(
            DisciplineTemplate::builder("Disc")
                .input("x", VariableDescriptor::float().shared("ns_in"))
                .output("y", VariableDescriptor::float())
                .behavior_fn(|_, inputs| {
                    let x = inputs["x"].as_float().unwrap_or_default();
                    Ok(ValueMap::from([("y".to_string(), Value::Float(x * 2.0))]))
                })
                .build()
                .unwrap(),
        )
    }

    fn setup() -> (NamespaceRegistry, DataManager, DisciplineInstance) {
        let registry = NamespaceRegistry::new();
        registry
            .add_ns(&ScopeId::root(), "ns_in", "root.inputs".parse().unwrap())
            .unwrap();
        let instance =
            DisciplineInstance::new(doubler(), "s1", ScopeId::root(), "root.s1.Disc".parse().unwrap());
        (registry, DataManager::new(), instance)
    }

    fn x_key() -> VariableKey {
        VariableKey::new("root.inputs".parse().unwrap(), "x")
    }

    async fn run_once(instance: &mut DisciplineInstance, dm: &DataManager) -> InstanceState {
        let ticket = instance.prepare(dm).unwrap();
        let done = ticket.run().await;
        instance.commit(done, dm).unwrap()
    }

    #[test]
    fn configure_declares_and_waits_for_inputs() {
        let (registry, dm, mut instance) = setup();
        instance.configure(&registry, &dm).unwrap();
        assert_eq!(instance.state(), InstanceState::Configured);
        assert!(dm.contains(&x_key()));
        assert_eq!(instance.refresh(&dm).unwrap(), None);

        dm.write(&x_key(), Value::Float(2.0), Writer::Host).unwrap();
        assert_eq!(instance.refresh(&dm).unwrap(), Some(InstanceState::Ready));
    }

    #[test]
    fn configure_fails_on_unknown_namespace() {
        let registry = NamespaceRegistry::new();
        let dm = DataManager::new();
        let mut instance =
            DisciplineInstance::new(doubler(), "s1", ScopeId::root(), "root.s1.Disc".parse().unwrap());
        let err = instance.configure(&registry, &dm).unwrap_err();
        assert!(matches!(
            err,
            DisciplineError::Namespace(fanout_namespace::NamespaceError::Unknown { .. })
        ));
        assert_eq!(instance.state(), InstanceState::Pending);
        assert!(dm.is_empty());
    }

    #[test]
    fn conflicting_output_rolls_back_inputs() {
        let (registry, dm, mut instance) = setup();
        let y = VariableKey::new("root.s1.Disc".parse().unwrap(), "y");
        dm.declare(y.clone(), &VariableDescriptor::string().validate("y").unwrap(), Writer::Host)
            .unwrap();

        let err = instance.configure(&registry, &dm).unwrap_err();
        assert!(matches!(
            err,
            DisciplineError::Data(DataError::ConflictingDeclaration { .. })
        ));
        assert_eq!(instance.state(), InstanceState::Pending);
        assert!(!dm.contains(&x_key()));
        assert_eq!(dm.len(), 1);
    }

    #[tokio::test]
    async fn execute_writes_outputs_and_goes_stale() {
        let (registry, dm, mut instance) = setup();
        instance.configure(&registry, &dm).unwrap();
        dm.write(&x_key(), Value::Float(2.5), Writer::Host).unwrap();
        instance.refresh(&dm).unwrap();

        assert_eq!(run_once(&mut instance, &dm).await, InstanceState::Executed);
        let y = instance.output_key("y").unwrap().clone();
        assert_eq!(dm.read(&y).unwrap(), Value::Float(5.0));
        assert_eq!(instance.refresh(&dm).unwrap(), None);

        dm.write(&x_key(), Value::Float(3.0), Writer::Host).unwrap();
        assert_eq!(instance.refresh(&dm).unwrap(), Some(InstanceState::Stale));
        assert_eq!(run_once(&mut instance, &dm).await, InstanceState::Executed);
        assert_eq!(dm.read(&y).unwrap(), Value::Float(6.0));
    }

    #[tokio::test]
    async fn behavior_error_marks_failed() {
        let template = Arc::new(
            DisciplineTemplate::builder("Boom")
                .output("y", VariableDescriptor::float())
                .behavior_fn(|_, _| anyhow::bail!("diverged"))
                .build()
                .unwrap(),
        );
        let registry = NamespaceRegistry::new();
        let dm = DataManager::new();
        let mut instance =
            DisciplineInstance::new(template, "s1", ScopeId::root(), "root.Boom".parse().unwrap());
        instance.configure(&registry, &dm).unwrap();
        instance.refresh(&dm).unwrap();

        assert_eq!(run_once(&mut instance, &dm).await, InstanceState::Failed);
        assert_eq!(instance.failure(), Some("diverged"));
        assert!(instance.prepare(&dm).is_err());

        instance.reset().unwrap();
        assert_eq!(instance.state(), InstanceState::Configured);
    }

    #[tokio::test]
    async fn wrong_output_shape_fails_without_writing() {
        let template = Arc::new(
            DisciplineTemplate::builder("Bad")
                .output("a", VariableDescriptor::float())
                .output("b", VariableDescriptor::float())
                .behavior_fn(|_, _| {
                    Ok(ValueMap::from([
                        ("a".to_string(), Value::Float(1.0)),
                        ("b".to_string(), Value::from("oops")),
                    ]))
                })
                .build()
                .unwrap(),
        );
        let registry = NamespaceRegistry::new();
        let dm = DataManager::new();
        let mut instance =
            DisciplineInstance::new(template, "k", ScopeId::root(), "root.Bad".parse().unwrap());
        instance.configure(&registry, &dm).unwrap();
        instance.refresh(&dm).unwrap();

        assert_eq!(run_once(&mut instance, &dm).await, InstanceState::Failed);
        let a = instance.output_key("a").unwrap();
        assert!(dm.try_read(a).is_none());
    }

    #[tokio::test]
    async fn destroyed_instance_discards_result() {
        let (registry, dm, mut instance) = setup();
        instance.configure(&registry, &dm).unwrap();
        dm.write(&x_key(), Value::Float(1.0), Writer::Host).unwrap();
        instance.refresh(&dm).unwrap();

        let ticket = instance.prepare(&dm).unwrap();
        let y = instance.output_key("y").unwrap().clone();
        assert_eq!(instance.teardown(&dm), 2);
        let done = ticket.run().await;
        assert_eq!(instance.commit(done, &dm).unwrap(), InstanceState::Destroyed);
        assert!(!dm.contains(&y));
    }

    #[test]
    fn teardown_keeps_shared_entries_declared_elsewhere() {
        let (registry, dm, mut instance) = setup();
        dm.declare(
            x_key(),
            &VariableDescriptor::float().shared("ns_in").validate("x").unwrap(),
            Writer::Host,
        )
        .unwrap();
        instance.configure(&registry, &dm).unwrap();
        assert_eq!(instance.teardown(&dm), 1);
        assert!(dm.contains(&x_key()));
        assert_eq!(instance.state(), InstanceState::Destroyed);
    }
}
