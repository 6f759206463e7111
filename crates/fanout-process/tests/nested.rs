//! Scatter of scatters inside a process

use fanout_data::{DataError, Value, VariableKey};
use fanout_namespace::{NamespaceError, ScopeId};
use fanout_process::{EngineConfig, Process, ProcessDefinition, ProcessError};
use fanout_scatter::{BuildMap, GatherMode, ScatterBlueprint};
use fanout_test_utils::{affine_template, float_map};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn key(path: &str, name: &str) -> VariableKey {
    VariableKey::new(path.parse().unwrap(), name)
}

fn nested_process() -> Process {
    let inner_map = BuildMap::new("name_list", "ns_scenario", "ac_name", "ns_scenario");
    let inner = ScatterBlueprint::new("inner", Arc::new(inner_map))
        .with_discipline(affine_template("Disc", 2.0, 3.0))
        .with_autogather("o");
    let outer_map = BuildMap::new("scenario_list", "ns_scatter_scenario", "scenario_name", "ns_scenario");
    let outer = ScatterBlueprint::new("multi_scenarios", Arc::new(outer_map))
        .with_scatter(inner)
        .with_autogather("o_gather");
    let definition = ProcessDefinition::new()
        .with_namespace("ns_scatter_scenario", "MyCase.multi_scenarios".parse().unwrap())
        .with_namespace("ns_scenario", "MyCase.multi_scenarios".parse().unwrap())
        .with_scatter(outer);
    Process::new(EngineConfig::default().with_study_name("MyCase"), definition).unwrap()
}

#[test]
fn inner_namespace_unknown_until_outer_configures() {
    let process = nested_process();
    let scenario_scope = ScopeId::root().child("multi_scenarios").child("scenario1");
    let err = process
        .registry()
        .resolve(&scenario_scope, &"ns_scenario".into())
        .unwrap_err();
    assert!(matches!(err, NamespaceError::Unknown { .. }));
    assert!(matches!(
        process.gather("multi_scenarios/scenario1/inner", "o"),
        Err(ProcessError::UnknownNode(_))
    ));

    process.configure();
    process
        .set_value("ns_scatter_scenario", "scenario_list", Value::string_list(["scenario1"]))
        .unwrap();
    let summary = process.configure();
    assert!(summary.is_clean());
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.reports[1].builder, "multi_scenarios/scenario1/inner");
    assert_eq!(
        process
            .registry()
            .resolve(&scenario_scope, &"ns_scenario".into())
            .unwrap()
            .to_string(),
        "MyCase.multi_scenarios.scenario1"
    );
}

#[tokio::test]
async fn nested_gathers_flatten_into_outer() {
    let process = nested_process();
    process.configure();
    process
        .set_value(
            "ns_scatter_scenario",
            "scenario_list",
            Value::string_list(["scenario1", "scenario2"]),
        )
        .unwrap();
    process.configure();

    let s1 = "MyCase.multi_scenarios.scenario1";
    let s2 = "MyCase.multi_scenarios.scenario2";
    process.write(&key(s1, "name_list"), Value::string_list(["x1", "x2"])).unwrap();
    process.write(&key(s2, "name_list"), Value::string_list(["x1"])).unwrap();
    let summary = process.configure();
    assert_eq!(summary.report("multi_scenarios/scenario1/inner").unwrap().created, vec!["x1", "x2"]);
    assert_eq!(summary.report("multi_scenarios/scenario2/inner").unwrap().created, vec!["x1"]);

    process.write(&key(&format!("{s1}.x1.Disc"), "x"), 1.0).unwrap();
    process.write(&key(&format!("{s1}.x2.Disc"), "x"), 2.0).unwrap();
    process.write(&key(&format!("{s2}.x1.Disc"), "x"), 3.0).unwrap();

    let report = process.execute().await.unwrap();
    assert_eq!(report.executed.len(), 3);
    assert!(report.executed.contains(&"multi_scenarios/scenario1/inner/x2/Disc".to_string()));

    let inner = process
        .wait_for_gather("multi_scenarios/scenario1/inner", "o", GatherMode::Strict)
        .await
        .unwrap();
    assert_eq!(inner.values, float_map(&[("x1", 5.0), ("x2", 7.0)]));
    assert_eq!(
        process.read(&key(s2, "o_gather")).unwrap(),
        Value::Dict(float_map(&[("x1", 9.0)]))
    );

    assert_eq!(
        process.read(&key("MyCase.multi_scenarios", "o_gather")).unwrap(),
        Value::Dict(float_map(&[
            ("scenario1.x1", 5.0),
            ("scenario1.x2", 7.0),
            ("scenario2.x1", 9.0),
        ]))
    );
}

#[tokio::test]
async fn dropping_scenario_removes_its_items() {
    let process = nested_process();
    process.configure();
    process
        .set_value(
            "ns_scatter_scenario",
            "scenario_list",
            Value::string_list(["scenario1", "scenario2"]),
        )
        .unwrap();
    process.configure();
    for scenario in ["scenario1", "scenario2"] {
        let path = format!("MyCase.multi_scenarios.{scenario}");
        process.write(&key(&path, "name_list"), Value::string_list(["x1"])).unwrap();
    }
    process.configure();
    assert_eq!(process.handles().len(), 2);

    process
        .set_value("ns_scatter_scenario", "scenario_list", Value::string_list(["scenario1"]))
        .unwrap();
    let summary = process.configure();
    assert_eq!(summary.report("multi_scenarios").unwrap().destroyed, vec!["scenario2"]);
    assert_eq!(process.states().keys().collect::<Vec<_>>(), vec!["multi_scenarios/scenario1/inner/x1/Disc"]);
    assert!(!process
        .data()
        .contains(&key("MyCase.multi_scenarios.scenario2.x1.Disc", "o")));
}

#[tokio::test]
async fn dropped_scenario_releases_its_gathered_mapping() {
    let process = nested_process();
    process.configure();
    process
        .set_value(
            "ns_scatter_scenario",
            "scenario_list",
            Value::string_list(["scenario1", "scenario2"]),
        )
        .unwrap();
    process.configure();
    let s1 = "MyCase.multi_scenarios.scenario1";
    let s2 = "MyCase.multi_scenarios.scenario2";
    for path in [s1, s2] {
        process.write(&key(path, "name_list"), Value::string_list(["x1"])).unwrap();
    }
    process.configure();
    process.write(&key(&format!("{s1}.x1.Disc"), "x"), 1.0).unwrap();
    process.write(&key(&format!("{s2}.x1.Disc"), "x"), 2.0).unwrap();
    process.execute().await.unwrap();
    assert_eq!(
        process.read(&key(s2, "o_gather")).unwrap(),
        Value::Dict(float_map(&[("x1", 7.0)]))
    );

    process
        .set_value("ns_scatter_scenario", "scenario_list", Value::string_list(["scenario1"]))
        .unwrap();
    process.configure();

    let err = process.read(&key(s2, "o_gather")).unwrap_err();
    assert_eq!(
        err,
        ProcessError::Data(DataError::Undeclared(format!("{s2}.o_gather")))
    );
    assert!(process.data().entries_under(&s2.parse().unwrap()).is_empty());
    assert_eq!(
        process.read(&key("MyCase.multi_scenarios", "o_gather")).unwrap(),
        Value::Dict(float_map(&[("scenario1.x1", 5.0)]))
    );
}
