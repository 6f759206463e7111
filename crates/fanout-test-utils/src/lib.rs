//! Testing utilities for the fanout workspace
//!
//! Shared templates, behaviours and registry helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use fanout_data::{DataManager, Value, VariableDescriptor, VariableKey, Writer};
use fanout_discipline::{DisciplineBehavior, DisciplineTemplate, RunContext, ValueMap};
use fanout_namespace::{NamespaceRegistry, ScopeId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Registry with the given `(id, path)` bindings in the root scope
pub fn registry_with(bindings: &[(&str, &str)]) -> NamespaceRegistry {
    let registry = NamespaceRegistry::new();
    for (id, path) in bindings {
        registry
            .add_ns(&ScopeId::root(), *id, path.parse().unwrap())
            .unwrap();
    }
    registry
}

pub fn key(namespace: &str, name: &str) -> VariableKey {
    VariableKey::new(namespace.parse().unwrap(), name)
}

pub fn write_list(data: &DataManager, key: &VariableKey, items: &[&str]) {
    data.write(key, Value::string_list(items.iter().copied()), Writer::Host)
        .unwrap();
}

pub fn write_float(data: &DataManager, key: &VariableKey, value: f64) {
    data.write(key, Value::Float(value), Writer::Host).unwrap();
}

pub fn outputs(pairs: &[(&str, Value)]) -> ValueMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

/// `o = a * x + b` with `x` and `o` local
pub fn affine_template(name: &str, a: f64, b: f64) -> Arc<DisciplineTemplate> {
    Arc::new(
        DisciplineTemplate::builder(name)
            .input("x", VariableDescriptor::float())
            .output("o", VariableDescriptor::float())
            .behavior_fn(move |_, inputs| {
                let x = inputs["x"].as_float().unwrap_or_default();
                Ok(outputs(&[("o", Value::Float(a * x + b))]))
            })
            .build()
            .unwrap(),
    )
}

/// Writes a per-key value to `o` after a per-key delay
#[derive(Debug, Clone, Default)]
pub struct KeyedOutput {
    pub values: HashMap<String, f64>,
    pub delays: HashMap<String, Duration>,
    pub failing: HashSet<String>,
}

impl KeyedOutput {
    pub fn new(values: &[(&str, f64)]) -> Self {
        Self {
            values: values.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            ..Self::default()
        }
    }

    pub fn delay(mut self, key: &str, millis: u64) -> Self {
        self.delays.insert(key.to_string(), Duration::from_millis(millis));
        self
    }

    pub fn fail_on(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }
}

#[async_trait]
impl DisciplineBehavior for KeyedOutput {
    async fn run(&self, ctx: &RunContext, _inputs: ValueMap) -> anyhow::Result<ValueMap> {
        if let Some(delay) = self.delays.get(&ctx.instance_key) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&ctx.instance_key) {
            anyhow::bail!("instance {} diverged", ctx.instance_key);
        }
        let value = self.values.get(&ctx.instance_key).copied().unwrap_or_default();
        Ok(outputs(&[("o", Value::Float(value))]))
    }
}

/// No inputs, local float output `o` computed by `behavior`
pub fn keyed_template(name: &str, behavior: KeyedOutput) -> Arc<DisciplineTemplate> {
    Arc::new(
        DisciplineTemplate::builder(name)
            .output("o", VariableDescriptor::float())
            .behavior(behavior)
            .build()
            .unwrap(),
    )
}

/// `y = x + 1` with `x` local and `y` shared in `ns`
pub fn producer_template(name: &str, ns: &str) -> Arc<DisciplineTemplate> {
    Arc::new(
        DisciplineTemplate::builder(name)
            .input("x", VariableDescriptor::float())
            .output("y", VariableDescriptor::float().shared(ns))
            .behavior_fn(|_, inputs| {
                let x = inputs["x"].as_float().unwrap_or_default();
                Ok(outputs(&[("y", Value::Float(x + 1.0))]))
            })
            .build()
            .unwrap(),
    )
}

/// `z = 10 * y` with `y` shared in `ns` and `z` local
pub fn consumer_template(name: &str, ns: &str) -> Arc<DisciplineTemplate> {
    Arc::new(
        DisciplineTemplate::builder(name)
            .input("y", VariableDescriptor::float().shared(ns))
            .output("z", VariableDescriptor::float())
            .behavior_fn(|_, inputs| {
                let y = inputs["y"].as_float().unwrap_or_default();
                Ok(outputs(&[("z", Value::Float(10.0 * y))]))
            })
            .build()
            .unwrap(),
    )
}

/// Ordered `{key: float}` mapping for comparisons
pub fn float_map(pairs: &[(&str, f64)]) -> IndexMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::Float(*v)))
        .collect()
}
