//! Single-level scatter driven through a process

use fanout_data::{DataError, DataFrame, TypeTag, Value, VariableDescriptor, VariableKey};
use fanout_discipline::InstanceState;
use fanout_process::{EngineConfig, Process, ProcessDefinition, ProcessError};
use fanout_scatter::{BuildMap, GatherMode, ScatterBlueprint, ScatterError};
use fanout_test_utils::{affine_template, float_map, keyed_template, KeyedOutput};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn key(path: &str, name: &str) -> VariableKey {
    VariableKey::new(path.parse().unwrap(), name)
}

fn scenario_process(blueprint: ScatterBlueprint) -> Process {
    let definition = ProcessDefinition::new()
        .with_namespace("ns_scatter", "study".parse().unwrap())
        .with_namespace("ns_root", "root".parse().unwrap())
        .with_scatter(blueprint);
    Process::new(EngineConfig::default(), definition).unwrap()
}

fn scenario_map() -> Arc<BuildMap> {
    Arc::new(BuildMap::new("scenario_list", "ns_scatter", "scenario_name", "ns_root"))
}

fn affine_process() -> Process {
    scenario_process(
        ScatterBlueprint::new("multi", scenario_map())
            .with_discipline(affine_template("Disc", 2.0, 3.0))
            .with_autogather("o"),
    )
}

fn configure_with(process: &Process, keys: &[&str]) {
    process
        .set_value("ns_scatter", "scenario_list", Value::string_list(keys.iter().copied()))
        .unwrap();
    let summary = process.configure();
    assert!(summary.is_clean(), "{:?}", summary.errors);
}

#[tokio::test]
async fn gather_after_execution_is_ordered() {
    let process = affine_process();
    let first = process.configure();
    assert!(first.report("multi").unwrap().created.is_empty());

    configure_with(&process, &["s1", "s2"]);
    process.write(&key("root.s1.Disc", "x"), 1.0).unwrap();
    process.write(&key("root.s2.Disc", "x"), 3.0).unwrap();

    let report = process.execute().await.unwrap();
    assert_eq!(report.rounds, 1);
    assert_eq!(report.executed.len(), 2);
    assert!(report.blocked.is_empty());

    let gathered = process.gather("multi", "o").unwrap().into_ready().unwrap();
    assert_eq!(gathered.values, float_map(&[("s1", 5.0), ("s2", 9.0)]));
    assert!(!gathered.is_partial());

    let stored = process.read(&key("study", "o_gather")).unwrap();
    assert_eq!(stored, Value::Dict(float_map(&[("s1", 5.0), ("s2", 9.0)])));
}

#[tokio::test]
async fn dropping_executed_key_releases_its_entries() {
    let process = affine_process();
    process.configure();
    configure_with(&process, &["s1", "s2"]);
    process.write(&key("root.s1.Disc", "x"), 1.0).unwrap();
    process.write(&key("root.s2.Disc", "x"), 3.0).unwrap();
    process.execute().await.unwrap();
    assert_eq!(process.states()["multi/s1/Disc"], InstanceState::Executed);

    configure_with(&process, &["s2"]);
    let err = process.read(&key("root.s1.Disc", "o")).unwrap_err();
    assert_eq!(err, ProcessError::Data(DataError::Undeclared("root.s1.Disc.o".to_string())));
    assert!(!process.states().contains_key("multi/s1/Disc"));

    // Retained instance keeps its output and does not rerun
    let report = process.execute().await.unwrap();
    assert!(report.executed.is_empty());
    assert_eq!(process.read(&key("root.s2.Disc", "o")).unwrap(), Value::Float(9.0));
    assert_eq!(
        process.read(&key("study", "o_gather")).unwrap(),
        Value::Dict(float_map(&[("s2", 9.0)]))
    );
}

#[tokio::test]
async fn rewritten_input_reruns_only_that_instance() {
    let process = affine_process();
    process.configure();
    configure_with(&process, &["s1", "s2"]);
    process.write(&key("root.s1.Disc", "x"), 1.0).unwrap();
    process.write(&key("root.s2.Disc", "x"), 3.0).unwrap();
    process.execute().await.unwrap();

    process.write(&key("root.s1.Disc", "x"), 10.0).unwrap();
    let report = process.execute().await.unwrap();
    assert_eq!(report.executed, vec!["multi/s1/Disc"]);
    let gathered = process.gather("multi", "o").unwrap().into_ready().unwrap();
    assert_eq!(gathered.values, float_map(&[("s1", 23.0), ("s2", 9.0)]));
}

#[tokio::test]
async fn missing_input_is_reported_blocked() {
    let process = affine_process();
    process.configure();
    configure_with(&process, &["s1", "s2"]);
    process.write(&key("root.s1.Disc", "x"), 1.0).unwrap();

    let report = process.execute().await.unwrap();
    assert_eq!(report.executed, vec!["multi/s1/Disc"]);
    assert_eq!(report.blocked, vec!["multi/s2/Disc"]);
    assert!(process.gather("multi", "o").unwrap().is_pending());
}

#[tokio::test]
async fn failure_is_isolated_and_never_retried() {
    let behavior = KeyedOutput::new(&[("s1", 1.0), ("s2", 2.0), ("s3", 3.0)]).fail_on("s2");
    let process = scenario_process(
        ScatterBlueprint::new("multi", scenario_map()).with_discipline(keyed_template("Disc", behavior)),
    );
    process.configure();
    configure_with(&process, &["s1", "s2", "s3"]);

    let report = process.execute().await.unwrap();
    assert_eq!(report.executed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].instance, "multi/s2/Disc");
    assert!(report.failed[0].message.contains("diverged"));
    assert!(matches!(
        report.clone().into_result(),
        Err(ProcessError::ExecutionFailure { ref instance, .. }) if instance == "multi/s2/Disc"
    ));

    let gathered = process.gather("multi", "o").unwrap().into_ready().unwrap();
    assert_eq!(gathered.values, float_map(&[("s1", 1.0), ("s3", 3.0)]));
    assert_eq!(gathered.failed_keys, vec!["s2"]);

    let strict = process.gather_with("multi", "o", GatherMode::Strict).unwrap_err();
    assert!(matches!(strict, ProcessError::Scatter(ScatterError::ExecutionFailure { .. })));

    // Nothing reruns on its own
    assert!(process.execute().await.unwrap().failed.is_empty());

    assert_eq!(process.reset_failed().unwrap(), vec!["multi/s2/Disc"]);
    assert_eq!(process.states()["multi/s2/Disc"], InstanceState::Configured);
    let report = process.execute().await.unwrap();
    assert_eq!(report.failed.len(), 1);
}

#[tokio::test]
async fn strict_gather_from_engine_config() {
    let behavior = KeyedOutput::new(&[("s1", 1.0)]).fail_on("s1");
    let definition = ProcessDefinition::new()
        .with_namespace("ns_scatter", "study".parse().unwrap())
        .with_namespace("ns_root", "root".parse().unwrap())
        .with_scatter(
            ScatterBlueprint::new("multi", scenario_map()).with_discipline(keyed_template("Disc", behavior)),
        );
    let process = Process::new(EngineConfig::default().with_strict_gather(true), definition).unwrap();
    process.configure();
    configure_with(&process, &["s1"]);
    process.execute().await.unwrap();
    assert!(process.gather("multi", "o").is_err());
}

#[tokio::test]
async fn dataframe_drives_selected_scenarios() {
    let process = affine_process();
    let df_key = process
        .declare(
            "ns_scatter",
            "scenario_list",
            &VariableDescriptor::dataframe([
                ("scenario_name", TypeTag::String),
                ("selected_scenario", TypeTag::Bool),
            ]),
        )
        .unwrap();
    let df = DataFrame::new()
        .with_column("scenario_name", vec!["s1".into(), "s2".into(), "s3".into()])
        .unwrap()
        .with_column("selected_scenario", vec![true.into(), false.into(), true.into()])
        .unwrap();
    process.write(&df_key, df).unwrap();

    let summary = process.configure();
    assert_eq!(summary.report("multi").unwrap().created, vec!["s1", "s3"]);
    assert_eq!(
        process.read(&key("root.s3", "scenario_name")).unwrap(),
        Value::from("s3")
    );
}

#[tokio::test]
async fn duplicate_key_leaves_last_good_configuration() {
    let process = affine_process();
    process.configure();
    configure_with(&process, &["s1"]);

    process
        .set_value("ns_scatter", "scenario_list", Value::string_list(["s1", "s2", "s2"]))
        .unwrap();
    let summary = process.configure();
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].node, "multi");
    assert!(matches!(
        summary.errors[0].error,
        ProcessError::Scatter(ScatterError::DuplicateKey { .. })
    ));
    assert_eq!(process.states().keys().collect::<Vec<_>>(), vec!["multi/s1/Disc"]);
}

#[tokio::test]
async fn shutdown_releases_everything() {
    let process = affine_process();
    process.configure();
    configure_with(&process, &["s1", "s2"]);
    process.write(&key("root.s1.Disc", "x"), 1.0).unwrap();
    process.write(&key("root.s2.Disc", "x"), 3.0).unwrap();
    process.execute().await.unwrap();
    assert!(!process.data().is_empty());

    process.shutdown();
    assert!(process.data().is_empty());
    assert!(process.handles().is_empty());
    assert_eq!(process.registry().open_scope_count(), 1);
}

#[test]
fn sibling_scatters_with_shared_keys_stay_apart() {
    let definition = ProcessDefinition::new()
        .with_namespace("ns_scatter", "study".parse().unwrap())
        .with_namespace("ns_root", "root".parse().unwrap())
        .with_scatter(ScatterBlueprint::new("a", scenario_map()).with_discipline(affine_template("DiscA", 1.0, 0.0)))
        .with_scatter(ScatterBlueprint::new("b", scenario_map()).with_discipline(affine_template("DiscB", 1.0, 0.0)));
    let process = Process::new(EngineConfig::default(), definition).unwrap();
    process.configure();

    configure_with(&process, &["s1"]);
    assert_eq!(
        process.states().keys().collect::<Vec<_>>(),
        vec!["a/s1/DiscA", "b/s1/DiscB"]
    );
    assert!(process.data().contains(&key("root.s1.DiscB", "o")));
}

#[tokio::test]
async fn emptied_list_clears_gathered_mapping() {
    let process = affine_process();
    process.configure();
    configure_with(&process, &["s1"]);
    process.write(&key("root.s1.Disc", "x"), 0.5).unwrap();
    process.execute().await.unwrap();
    assert_eq!(
        process.read(&key("study", "o_gather")).unwrap(),
        Value::Dict(float_map(&[("s1", 4.0)]))
    );

    configure_with(&process, &[]);
    assert_eq!(process.read(&key("study", "o_gather")).unwrap(), Value::Dict(float_map(&[])));
    let report = process.execute().await.unwrap();
    assert!(report.executed.is_empty());
    assert_eq!(process.read(&key("study", "o_gather")).unwrap(), Value::Dict(float_map(&[])));
}
