//! Gather aggregator
//!
//! Collects one output variable from every instance of a builder into a
//! mapping ordered by the driving list captured at configure time.
//! Failed instances are left out and reported; the caller picks strict or
//! lenient handling through [`GatherMode`].

use fanout_data::{DataManager, Value};
use fanout_namespace::NamespaceRegistry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info_span, warn};

use fanout_discipline::InstanceState;

use crate::builder::{BuilderStatus, ScatterBuilder};
use crate::error::ScatterError;

/// Handling of failed instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatherMode {
    /// Partial result plus the failing keys
    #[default]
    Lenient,
    /// Any failure fails the whole gather
    Strict,
}

/// Gathered mapping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatherResult {
    /// Gathered variable
    pub var: String,
    /// Values keyed by instance key, in driving-list order
    pub values: IndexMap<String, Value>,
    /// Keys of failed instances, in driving-list order
    pub failed_keys: Vec<String>,
}

impl GatherResult {
    /// Some instance failed
    #[inline]
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed_keys.is_empty()
    }

    /// Mapping as a `dict` value
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Dict(self.values.clone())
    }
}

/// Gather state
#[derive(Debug, Clone, PartialEq)]
pub enum GatherOutcome {
    /// Some instance has not settled yet
    Pending {
        /// Keys still running or waiting on inputs
        waiting: Vec<String>,
    },
    /// Every instance settled
    Ready(GatherResult),
}

impl GatherOutcome {
    /// Not resolvable yet
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Result, if ready
    #[must_use]
    pub fn ready(&self) -> Option<&GatherResult> {
        match self {
            Self::Ready(result) => Some(result),
            Self::Pending { .. } => None,
        }
    }

    /// Consume into the result, if ready
    #[must_use]
    pub fn into_ready(self) -> Option<GatherResult> {
        match self {
            Self::Ready(result) => Some(result),
            Self::Pending { .. } => None,
        }
    }
}

/// Reads gathered outputs from the data manager
#[derive(Debug, Clone)]
pub struct GatherAggregator {
    registry: Arc<NamespaceRegistry>,
    data: Arc<DataManager>,
}

impl GatherAggregator {
    /// Aggregator over the given process state
    #[must_use]
    pub fn new(registry: Arc<NamespaceRegistry>, data: Arc<DataManager>) -> Self {
        Self { registry, data }
    }

    /// Gather `var` across every instance of `builder`
    ///
    /// Pending while the builder is pending or any instance (nested ones
    /// included) is neither `executed` nor `failed`.
    ///
    /// # Errors
    /// - [`ScatterError::UnknownOutput`] if an instance does not produce `var`
    /// - [`ScatterError::ExecutionFailure`] in strict mode when any
    ///   instance failed
    pub fn gather(
        &self,
        builder: &ScatterBuilder,
        var: &str,
        mode: GatherMode,
    ) -> Result<GatherOutcome, ScatterError> {
        let span = info_span!("gather", builder = %builder.display_name(), var = %var);
        let _enter = span.enter();

        if builder.status() == BuilderStatus::Pending {
            return Ok(GatherOutcome::Pending { waiting: Vec::new() });
        }

        let mut waiting = Vec::new();
        let mut failed_keys = Vec::new();
        let mut values = IndexMap::new();

        for instance in builder.instances() {
            let nested_pending = instance
                .children()
                .iter()
                .any(|child| child.status() == BuilderStatus::Pending);
            let states: Vec<InstanceState> =
                instance.handles().iter().map(|h| h.state()).collect();
            if nested_pending || states.iter().any(|s| !s.is_settled()) {
                waiting.push(instance.key().to_string());
                continue;
            }
            if states.contains(&InstanceState::Failed) {
                failed_keys.push(instance.key().to_string());
                continue;
            }

            let key = instance
                .locate(var, &self.registry, &self.data)
                .ok_or_else(|| ScatterError::UnknownOutput {
                    var: var.to_string(),
                    key: instance.key().to_string(),
                })?;
            let label = self
                .data
                .try_read(instance.key_var())
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| instance.key().to_string());
            match self.data.try_read(&key) {
                Some(value) => {
                    values.insert(label, value);
                }
                None => {
                    debug!("Output {} of {} never written", key, instance.key());
                    failed_keys.push(instance.key().to_string());
                }
            }
        }

        if !waiting.is_empty() {
            debug!("Gather pending on {:?}", waiting);
            return Ok(GatherOutcome::Pending { waiting });
        }
        if !failed_keys.is_empty() {
            if mode == GatherMode::Strict {
                return Err(ScatterError::ExecutionFailure {
                    var: var.to_string(),
                    failed_keys,
                });
            }
            warn!("Partial gather of {}: failed keys {:?}", var, failed_keys);
        }

        Ok(GatherOutcome::Ready(GatherResult {
            var: var.to_string(),
            values,
            failed_keys,
        }))
    }
}
