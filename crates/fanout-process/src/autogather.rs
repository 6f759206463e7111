//! Gathered outputs written back to the data manager
//!
//! For every variable `v` a scatter node lists, the gathered mapping is
//! stored as a shared `dict` named `v_gather` in the builder's gather
//! namespace. Gathering a variable that already ends in `_gather` (the
//! result of a nested scatter) flattens it: inner keys become
//! `<outer key>.<inner key>`.

use fanout_data::{DataManager, TypeSpec, Value, VariableKey, VariableSpec, Writer};
use fanout_namespace::NamespaceRegistry;
use fanout_scatter::{GatherAggregator, GatherMode, GatherOutcome, ScatterBuilder};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::ProcessError;

const GATHER_SUFFIX: &str = "_gather";

/// Name the gathered mapping of `var` is stored under
#[must_use]
pub fn gathered_name(var: &str) -> String {
    if var.ends_with(GATHER_SUFFIX) {
        var.to_string()
    } else {
        format!("{var}{GATHER_SUFFIX}")
    }
}

/// Merge `{outer: {inner: v}}` into `{"outer.inner": v}`
///
/// Entries that are not mappings keep their outer key.
#[must_use]
pub fn flatten(values: &IndexMap<String, Value>) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    for (outer, value) in values {
        match value {
            Value::Dict(inner) => {
                for (key, v) in inner {
                    out.insert(format!("{outer}.{key}"), v.clone());
                }
            }
            other => {
                out.insert(outer.clone(), other.clone());
            }
        }
    }
    out
}

pub(crate) struct AutoGather<'a> {
    pub(crate) registry: &'a NamespaceRegistry,
    pub(crate) data: &'a DataManager,
    pub(crate) aggregator: &'a GatherAggregator,
    pub(crate) declared: &'a mut BTreeSet<VariableKey>,
}

impl AutoGather<'_> {
    /// Inner builders first so outer ones can gather their results.
    /// Returns the number of entries rewritten.
    pub(crate) fn run(&mut self, builder: &ScatterBuilder) -> Result<usize, ProcessError> {
        let mut written = 0;
        for instance in builder.instances() {
            for child in instance.children() {
                written += self.run(child)?;
            }
        }
        for var in &builder.blueprint().autogather {
            if self.store(builder, var)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Undeclare every gathered entry whose builder is gone
    ///
    /// `live` holds the entries the current node tree can still produce.
    /// Returns the number of entries released.
    pub(crate) fn prune(&mut self, live: &BTreeSet<VariableKey>) -> usize {
        let stale: Vec<VariableKey> = self.declared.difference(live).cloned().collect();
        for key in &stale {
            self.declared.remove(key);
            match self.data.undeclare(key) {
                Ok(_) => debug!("Released gathered variable {}", key),
                Err(e) => debug!("Gathered variable {}: {}", key, e),
            }
        }
        stale.len()
    }

    fn store(&mut self, builder: &ScatterBuilder, var: &str) -> Result<bool, ProcessError> {
        let result = match self.aggregator.gather(builder, var, GatherMode::Lenient)? {
            GatherOutcome::Ready(result) => result,
            GatherOutcome::Pending { .. } => return Ok(false),
        };
        let key = VariableKey::new(builder.gather_path(self.registry)?, gathered_name(var));
        let Some(element) = self.element_spec(builder, var) else {
            if self.declared.contains(&key) && result.values.is_empty() {
                return self.write_changed(&key, Value::Dict(IndexMap::new()));
            }
            debug!("Nothing to gather for {} in {}", var, builder.display_name());
            return Ok(false);
        };

        let nested = var.ends_with(GATHER_SUFFIX);
        let (spec, value) = if nested {
            let inner = match element {
                TypeSpec::Dict(inner) => *inner,
                other => other,
            };
            (TypeSpec::Dict(Box::new(inner)), Value::Dict(flatten(&result.values)))
        } else {
            (TypeSpec::Dict(Box::new(element)), result.to_value())
        };

        if !self.declared.contains(&key) {
            self.data
                .declare(key.clone(), &VariableSpec::of(spec).into_shared(), Writer::Host)?;
            self.declared.insert(key.clone());
        }
        self.write_changed(&key, value)
    }

    fn write_changed(&self, key: &VariableKey, value: Value) -> Result<bool, ProcessError> {
        if self.data.try_read(key).as_ref() == Some(&value) {
            return Ok(false);
        }
        self.data.write(key, value, Writer::Host)?;
        debug!("Auto-gathered into {}", key);
        Ok(true)
    }

    fn element_spec(&self, builder: &ScatterBuilder, var: &str) -> Option<TypeSpec> {
        builder.instances().find_map(|instance| {
            let key = instance.locate(var, self.registry, self.data)?;
            self.data.entry(&key).map(|e| e.spec.type_spec)
        })
    }
}

/// Gathered entries the builder tree rooted at `builder` can produce
pub(crate) fn live_keys(builder: &ScatterBuilder, registry: &NamespaceRegistry, out: &mut BTreeSet<VariableKey>) {
    if let Ok(path) = builder.gather_path(registry) {
        for var in &builder.blueprint().autogather {
            out.insert(VariableKey::new(path.clone(), gathered_name(var)));
        }
    }
    for instance in builder.instances() {
        for child in instance.children() {
            live_keys(child, registry, out);
        }
    }
}
