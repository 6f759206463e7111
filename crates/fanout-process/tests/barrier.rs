//! Gather barrier and cancellation of running instances

use fanout_data::{Value, VariableKey};
use fanout_discipline::InstanceState;
use fanout_process::{EngineConfig, Process, ProcessDefinition};
use fanout_scatter::{BuildMap, GatherMode, ScatterBlueprint};
use fanout_test_utils::{float_map, keyed_template, KeyedOutput};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn keyed_process(behavior: KeyedOutput, keys: &[&str]) -> Arc<Process> {
    let map = BuildMap::new("scenario_list", "ns_study", "scenario_name", "ns_study");
    let definition = ProcessDefinition::new()
        .with_namespace("ns_study", "study".parse().unwrap())
        .with_scatter(ScatterBlueprint::new("multi", Arc::new(map)).with_discipline(keyed_template("Disc", behavior)));
    let process = Process::new(EngineConfig::default(), definition).unwrap();
    process.configure();
    set_keys(&process, keys);
    Arc::new(process)
}

fn set_keys(process: &Process, keys: &[&str]) {
    process
        .set_value("ns_study", "scenario_list", Value::string_list(keys.iter().copied()))
        .unwrap();
    assert!(process.configure().is_clean());
}

#[tokio::test]
async fn wait_for_gather_resolves_after_execution() {
    let behavior = KeyedOutput::new(&[("b", 2.0), ("a", 1.0), ("c", 3.0)])
        .delay("b", 40)
        .delay("c", 20);
    let process = keyed_process(behavior, &["b", "a", "c"]);

    let waiter = {
        let process = Arc::clone(&process);
        tokio::spawn(async move { process.wait_for_gather("multi", "o", GatherMode::Lenient).await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    process.execute().await.unwrap();
    let gathered = waiter.await.unwrap().unwrap();
    assert_eq!(gathered.values, float_map(&[("b", 2.0), ("a", 1.0), ("c", 3.0)]));
}

#[tokio::test]
async fn dropping_running_key_cancels_its_task() {
    let behavior = KeyedOutput::new(&[("s1", 1.0), ("s2", 2.0)]).delay("s2", 5_000);
    let process = keyed_process(behavior, &["s1", "s2"]);

    let execution = {
        let process = Arc::clone(&process);
        tokio::spawn(async move { process.execute().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(process.states()["multi/s1/Disc"], InstanceState::Executed);
    assert_eq!(process.states()["multi/s2/Disc"], InstanceState::Ready);

    set_keys(&process, &["s1"]);
    let report = tokio::time::timeout(Duration::from_secs(2), execution)
        .await
        .expect("cancelled instance must not hold up execution")
        .unwrap()
        .unwrap();
    assert_eq!(report.executed, vec!["multi/s1/Disc"]);
    assert!(report.failed.is_empty());
    assert!(!process
        .data()
        .contains(&VariableKey::new("study.s2.Disc".parse().unwrap(), "o")));
}
