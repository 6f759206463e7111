//! Datasets manager over the shipped connectors

use fanout_connector::{
    ConnectorError, ConnectorRegistry, DatasetConnector, DatasetRef, DatasetsManager, InMemoryConnector,
    JsonFileConnector,
};
use fanout_data::{DataFrame, DataManager, TypeSpec, TypeTag, Value, VariableDescriptor, VariableKey, Writer};
use fanout_namespace::NamespacePath;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn path(s: &str) -> NamespacePath {
    s.parse().unwrap()
}

fn declare(data: &DataManager, ns: &NamespacePath, name: &str, desc: VariableDescriptor) -> VariableKey {
    let key = VariableKey::new(ns.clone(), name);
    data.declare(key.clone(), &desc.validate(name).unwrap(), Writer::Host).unwrap();
    key
}

fn write_file(dir: &tempfile::TempDir, body: &serde_json::Value) -> std::path::PathBuf {
    let file = dir.path().join("datasets.json");
    std::fs::write(&file, serde_json::to_string_pretty(body).unwrap()).unwrap();
    file
}

#[tokio::test]
async fn later_dataset_overrides_earlier() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(
        &dir,
        &serde_json::json!({
            "dataset_1": {"a": 1.0, "b": 2.0, "unused": "x"},
            "dataset_2": {"b": 5.0},
        }),
    );
    let mut connectors = ConnectorRegistry::new();
    connectors.register("json", Arc::new(JsonFileConnector::new(&file))).unwrap();

    let ns = path("usecase.Disc1");
    let data = DataManager::new();
    let a = declare(&data, &ns, "a", VariableDescriptor::float());
    let b = declare(&data, &ns, "b", VariableDescriptor::float());
    let c = declare(&data, &ns, "c", VariableDescriptor::float());

    let manager = DatasetsManager::new(connectors).with_mapping(
        ns,
        [DatasetRef::new("json", "dataset_1"), DatasetRef::new("json", "dataset_2")],
    );
    let provenance = manager.load_into(&data).await.unwrap();

    assert_eq!(data.read(&a).unwrap(), Value::Float(1.0));
    assert_eq!(data.read(&b).unwrap(), Value::Float(5.0));
    assert!(data.try_read(&c).is_none());
    assert_eq!(provenance[&a], DatasetRef::new("json", "dataset_1"));
    assert_eq!(provenance[&b], DatasetRef::new("json", "dataset_2"));
    assert!(!provenance.contains_key(&c));
}

#[tokio::test]
async fn missing_dataset_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(&dir, &serde_json::json!({"dataset_1": {}}));
    let mut connectors = ConnectorRegistry::new();
    connectors.register("json", Arc::new(JsonFileConnector::new(&file))).unwrap();

    let ns = path("usecase");
    let data = DataManager::new();
    declare(&data, &ns, "a", VariableDescriptor::float());
    let manager = DatasetsManager::new(connectors).with_mapping(ns, [DatasetRef::new("json", "dataset_9")]);

    let err = manager.load_into(&data).await.unwrap_err();
    assert!(matches!(err, ConnectorError::UnknownDataset(ref d) if d == "dataset_9"));
}

#[tokio::test]
async fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let connector = JsonFileConnector::new(dir.path().join("absent.json"));
    let err = connector.list_available_datasets().await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn wrongly_typed_value_fails_decode() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(&dir, &serde_json::json!({"d": {"a": "not a float"}}));
    let connector = JsonFileConnector::new(&file);
    let mut types = fanout_connector::TypeMap::new();
    types.insert("a".into(), TypeSpec::Scalar(TypeTag::Float));

    let err = connector.get_values("d", &types).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Decode { ref name, .. } if name == "a"));
}

#[tokio::test]
async fn export_then_reload_through_json() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("out.json");
    let mut connectors = ConnectorRegistry::new();
    connectors.register("json", Arc::new(JsonFileConnector::new(&file))).unwrap();
    let manager = DatasetsManager::new(connectors);

    let ns = path("usecase.Disc1");
    let data = DataManager::new();
    let list = declare(&data, &ns, "scenario_list", VariableDescriptor::list_of(TypeTag::String));
    let df = declare(&data, &ns, "df", VariableDescriptor::dataframe([("x", TypeTag::Float), ("y", TypeTag::Float)]));
    declare(&data, &ns, "unset", VariableDescriptor::float());
    data.write(&list, Value::string_list(["s1", "s2"]), Writer::Host).unwrap();
    let frame = DataFrame::new()
        .with_column("x", vec![Value::Float(1.0), Value::Float(2.0)])
        .unwrap()
        .with_column("y", vec![Value::Float(3.0), Value::Float(4.0)])
        .unwrap();
    data.write(&df, Value::DataFrame(frame.clone()), Writer::Host).unwrap();

    let target = DatasetRef::new("json", "exported");
    assert!(manager.export(&data, &ns, &target, false, true).await.is_err());
    assert_eq!(manager.export(&data, &ns, &target, true, true).await.unwrap(), 2);

    let fresh = DataManager::new();
    let list2 = declare(&fresh, &ns, "scenario_list", VariableDescriptor::list_of(TypeTag::String));
    let df2 = declare(&fresh, &ns, "df", VariableDescriptor::dataframe([("x", TypeTag::Float), ("y", TypeTag::Float)]));
    let reloaded = manager.with_mapping(ns, [target]);
    reloaded.load_into(&fresh).await.unwrap();
    assert_eq!(fresh.read(&list2).unwrap(), Value::string_list(["s1", "s2"]));
    assert_eq!(fresh.read(&df2).unwrap(), Value::DataFrame(frame));
}

#[tokio::test]
async fn mapping_document_checks_connectors() {
    let mut connectors = ConnectorRegistry::new();
    connectors
        .register("mem", Arc::new(InMemoryConnector::new().with_dataset("d", [("a", Value::Int(3))])))
        .unwrap();

    let manager = DatasetsManager::new(connectors.clone())
        .with_mapping_yaml("usecase:\n  - {connector: mem, dataset: d}\n")
        .unwrap();
    assert_eq!(manager.datasets_for(&path("usecase")), &[DatasetRef::new("mem", "d")]);

    let err = DatasetsManager::new(connectors)
        .with_mapping_yaml("usecase:\n  - {connector: s3, dataset: d}\n")
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Configuration(_)));
}
