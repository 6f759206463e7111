//! Round planning
//!
//! Each execution round snapshots every live instance into a [`Slot`],
//! orders the slots by data dependency and picks the ones that may run
//! concurrently. An instance runs once all producers of its inputs have
//! executed; two instances writing the same shared key never run in the
//! same round.

use fanout_data::{VariableKey, Visibility};
use fanout_discipline::{DisciplineInstance, InstanceState};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use std::collections::HashSet;
use tracing::debug;

/// Scheduling view of one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Lifecycle state after refresh
    pub state: InstanceState,
    /// Consumed keys
    pub inputs: Vec<VariableKey>,
    /// Produced keys, flagged when shared
    pub outputs: Vec<(VariableKey, bool)>,
}

impl Slot {
    /// Snapshot an instance
    #[must_use]
    pub fn of(instance: &DisciplineInstance) -> Self {
        Self {
            state: instance.state(),
            inputs: instance.inputs().values().map(|b| b.key.clone()).collect(),
            outputs: instance
                .outputs()
                .values()
                .map(|b| (b.key.clone(), b.spec.visibility == Visibility::Shared))
                .collect(),
        }
    }

    fn produces(&self, key: &VariableKey) -> bool {
        self.outputs.iter().any(|(k, _)| k == key)
    }
}

/// Result of planning one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Every slot in dependency order
    pub order: Vec<usize>,
    /// Slots to run this round, in schedule order
    pub runnable: Vec<usize>,
    /// Runnable slots pushed to a later round by a shared-write conflict
    pub deferred: Vec<usize>,
}

/// Producer-to-consumer graph over slot indices
#[must_use]
pub fn dependency_graph(slots: &[Slot]) -> DiGraphMap<usize, ()> {
    let mut graph = DiGraphMap::new();
    for idx in 0..slots.len() {
        graph.add_node(idx);
    }
    for (consumer, slot) in slots.iter().enumerate() {
        for key in &slot.inputs {
            for (producer, other) in slots.iter().enumerate() {
                if producer != consumer && other.produces(key) {
                    graph.add_edge(producer, consumer, ());
                }
            }
        }
    }
    graph
}

/// Plan one round
#[must_use]
pub fn schedule(slots: &[Slot]) -> Schedule {
    let graph = dependency_graph(slots);
    let order = match toposort(&graph, None) {
        Ok(order) => order,
        Err(cycle) => {
            debug!("Coupling cycle through slot {}, using declaration order", cycle.node_id());
            (0..slots.len()).collect()
        }
    };

    let mut claimed: HashSet<&VariableKey> = HashSet::new();
    let mut runnable = Vec::new();
    let mut deferred = Vec::new();
    for &idx in &order {
        let slot = &slots[idx];
        if !slot.state.is_runnable() {
            continue;
        }
        let producers_done = graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .all(|p| slots[p].state == InstanceState::Executed);
        if !producers_done {
            continue;
        }
        let shared: Vec<&VariableKey> =
            slot.outputs.iter().filter(|(_, s)| *s).map(|(k, _)| k).collect();
        if shared.iter().any(|k| claimed.contains(k)) {
            deferred.push(idx);
            continue;
        }
        claimed.extend(shared);
        runnable.push(idx);
    }

    Schedule {
        order,
        runnable,
        deferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> VariableKey {
        VariableKey::new("study".parse().unwrap(), name)
    }

    fn slot(state: InstanceState, inputs: &[&str], outputs: &[(&str, bool)]) -> Slot {
        Slot {
            state,
            inputs: inputs.iter().map(|n| key(n)).collect(),
            outputs: outputs.iter().map(|(n, s)| (key(n), *s)).collect(),
        }
    }

    #[test]
    fn consumer_waits_for_producer() {
        let slots = vec![
            slot(InstanceState::Ready, &["y"], &[("z", false)]),
            slot(InstanceState::Ready, &["x"], &[("y", true)]),
        ];
        let plan = schedule(&slots);
        assert_eq!(plan.order, vec![1, 0]);
        assert_eq!(plan.runnable, vec![1]);

        let slots = vec![
            slot(InstanceState::Ready, &["y"], &[("z", false)]),
            slot(InstanceState::Executed, &["x"], &[("y", true)]),
        ];
        assert_eq!(schedule(&slots).runnable, vec![0]);
    }

    #[test]
    fn failed_producer_blocks_consumer() {
        let slots = vec![
            slot(InstanceState::Failed, &["x"], &[("y", true)]),
            slot(InstanceState::Ready, &["y"], &[("z", false)]),
        ];
        assert!(schedule(&slots).runnable.is_empty());
    }

    #[test]
    fn shared_writers_split_across_rounds() {
        let slots = vec![
            slot(InstanceState::Ready, &[], &[("y", true)]),
            slot(InstanceState::Ready, &[], &[("y", true)]),
            slot(InstanceState::Ready, &[], &[("w", false)]),
        ];
        let plan = schedule(&slots);
        assert_eq!(plan.runnable, vec![0, 2]);
        assert_eq!(plan.deferred, vec![1]);
    }

    #[test]
    fn cycle_never_runs() {
        let slots = vec![
            slot(InstanceState::Ready, &["b"], &[("a", true)]),
            slot(InstanceState::Ready, &["a"], &[("b", true)]),
        ];
        let plan = schedule(&slots);
        assert_eq!(plan.order, vec![0, 1]);
        assert!(plan.runnable.is_empty());
    }

    #[test]
    fn self_feeding_instance_is_not_its_own_producer() {
        let slots = vec![slot(InstanceState::Stale, &["y"], &[("y", true)])];
        assert_eq!(schedule(&slots).runnable, vec![0]);
    }
}
