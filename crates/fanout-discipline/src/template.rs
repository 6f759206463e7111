//! Discipline templates
//!
//! A [`DisciplineTemplate`] is immutable once built and shared by all of its
//! instances through an `Arc`. The executable part is a
//! [`DisciplineBehavior`] trait object.

use async_trait::async_trait;
use fanout_data::{Value, VariableDescriptor};
use fanout_namespace::{NamespaceId, NamespacePath};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::DisciplineError;

/// Input or output values keyed by short variable name
pub type ValueMap = IndexMap<String, Value>;

/// What a behaviour knows about the instance running it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// Scatter key (or template name outside a scatter)
    pub instance_key: String,
    /// Template name
    pub template: String,
    /// Local namespace of the instance
    pub local_ns: NamespacePath,
}

/// Executable part of a discipline
///
/// Implementations are host code; the engine never looks inside. Inputs
/// contain every required input plus the optional ones that hold a value.
/// The returned map may omit outputs but must not name undeclared ones.
#[async_trait]
pub trait DisciplineBehavior: Send + Sync {
    /// Compute outputs from inputs
    async fn run(&self, ctx: &RunContext, inputs: ValueMap) -> anyhow::Result<ValueMap>;
}

type BehaviorFn = dyn Fn(&RunContext, ValueMap) -> anyhow::Result<ValueMap> + Send + Sync;

/// Synchronous closure as a behaviour
pub struct FnBehavior {
    f: Box<BehaviorFn>,
}

impl FnBehavior {
    /// Wrap a closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RunContext, ValueMap) -> anyhow::Result<ValueMap> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

impl fmt::Debug for FnBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBehavior").finish_non_exhaustive()
    }
}

#[async_trait]
impl DisciplineBehavior for FnBehavior {
    async fn run(&self, ctx: &RunContext, inputs: ValueMap) -> anyhow::Result<ValueMap> {
        (self.f)(ctx, inputs)
    }
}

/// Declarative discipline: typed inputs and outputs plus a behaviour
#[derive(Clone)]
pub struct DisciplineTemplate {
    name: String,
    inputs: IndexMap<String, VariableDescriptor>,
    outputs: IndexMap<String, VariableDescriptor>,
    behavior: Arc<dyn DisciplineBehavior>,
}

impl DisciplineTemplate {
    /// Start building a template
    #[must_use]
    pub fn builder(name: impl Into<String>) -> DisciplineTemplateBuilder {
        DisciplineTemplateBuilder {
            name: name.into(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            behavior: None,
        }
    }

    /// Template name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input declarations in declaration order
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &IndexMap<String, VariableDescriptor> {
        &self.inputs
    }

    /// Output declarations in declaration order
    #[inline]
    #[must_use]
    pub fn outputs(&self) -> &IndexMap<String, VariableDescriptor> {
        &self.outputs
    }

    /// Shared handle on the behaviour
    #[inline]
    #[must_use]
    pub fn behavior(&self) -> Arc<dyn DisciplineBehavior> {
        Arc::clone(&self.behavior)
    }

    /// Namespace identifiers referenced by any declaration
    #[must_use]
    pub fn namespace_ids(&self) -> BTreeSet<NamespaceId> {
        self.inputs
            .values()
            .chain(self.outputs.values())
            .filter_map(|d| d.namespace.clone())
            .collect()
    }
}

impl fmt::Debug for DisciplineTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisciplineTemplate")
            .field("name", &self.name)
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder for [`DisciplineTemplate`]
pub struct DisciplineTemplateBuilder {
    name: String,
    inputs: IndexMap<String, VariableDescriptor>,
    outputs: IndexMap<String, VariableDescriptor>,
    behavior: Option<Arc<dyn DisciplineBehavior>>,
}

impl DisciplineTemplateBuilder {
    /// Declare an input
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, descriptor: VariableDescriptor) -> Self {
        self.inputs.insert(name.into(), descriptor);
        self
    }

    /// Declare an output
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, descriptor: VariableDescriptor) -> Self {
        self.outputs.insert(name.into(), descriptor);
        self
    }

    /// Set the behaviour
    #[must_use]
    pub fn behavior(mut self, behavior: impl DisciplineBehavior + 'static) -> Self {
        self.behavior = Some(Arc::new(behavior));
        self
    }

    /// Set the behaviour from a closure
    #[must_use]
    pub fn behavior_fn<F>(self, f: F) -> Self
    where
        F: Fn(&RunContext, ValueMap) -> anyhow::Result<ValueMap> + Send + Sync + 'static,
    {
        self.behavior(FnBehavior::new(f))
    }

    /// Validate and build
    ///
    /// # Errors
    /// [`DisciplineError::Configuration`] when the name is not a single path
    /// segment, no behaviour was set, or a descriptor fails validation.
    pub fn build(self) -> Result<DisciplineTemplate, DisciplineError> {
        if self.name.is_empty() || self.name.contains('.') {
            return Err(DisciplineError::Configuration(format!(
                "template name '{}' must be a single path segment",
                self.name
            )));
        }
        let behavior = self.behavior.ok_or_else(|| {
            DisciplineError::Configuration(format!("template '{}' has no behaviour", self.name))
        })?;
        for (var, desc) in self.inputs.iter().chain(self.outputs.iter()) {
            desc.validate(var)?;
        }
        Ok(DisciplineTemplate {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            behavior,
        })
    }
}
