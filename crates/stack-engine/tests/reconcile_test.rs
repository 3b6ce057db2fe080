use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use stack_engine::adapter::{Adapters, EngineOp, MemoryEngine};
use stack_engine::error::AdapterError;
use stack_engine::state::{FileStore, MemoryStore, StateActor, StateStore};
use stack_engine::{
    BlockCause, Deployment, EngineConfig, Outcome, ResolvedGraph, ResourceGraph, ResourceSpec,
    RetryPolicy, Value,
};
use tokio::task::JoinHandle;

fn container(name: &str) -> ResourceSpec {
    ResourceSpec::container(name)
        .with_property("image", Value::reference("img", "id"))
        .with_property(
            "networks",
            Value::list([Value::map([("name", Value::reference("net", "name"))])]),
        )
}

/// Network `net`, image `img`, and two independent containers on the network.
fn two_containers() -> ResolvedGraph {
    let mut graph = ResourceGraph::new();
    graph.add_resource(ResourceSpec::network("net")).unwrap();
    graph
        .add_resource(ResourceSpec::image("img").with_property("name", "redis:7-alpine"))
        .unwrap();
    graph.add_resource(container("a")).unwrap();
    graph.add_resource(container("b")).unwrap();
    graph.resolve_references().unwrap()
}

async fn start(
    graph: ResolvedGraph,
    outputs: BTreeMap<String, Value>,
    engine: &MemoryEngine,
    store: Arc<dyn StateStore>,
) -> (Deployment, JoinHandle<()>) {
    let (actor, state) = StateActor::load("dev", store, 32).await.unwrap();
    let handle = tokio::spawn(actor.run());
    let config = EngineConfig {
        retry: RetryPolicy::none(),
        ..Default::default()
    };
    let adapters = Adapters::new(Arc::new(engine.clone()));
    (
        Deployment::new(graph, outputs, adapters, state, &config),
        handle,
    )
}

/// Network N with containers A and B that only depend on N.
#[tokio::test]
async fn test_dependents_are_planned_after_their_dependency() {
    let mut graph = ResourceGraph::new();
    graph.add_resource(ResourceSpec::network("n")).unwrap();
    graph
        .add_resource(ResourceSpec::container("a").depends_on("n"))
        .unwrap();
    graph
        .add_resource(ResourceSpec::container("b").depends_on("n"))
        .unwrap();
    let graph = graph.resolve_references().unwrap();

    let engine = MemoryEngine::new();
    let (deployment, _handle) =
        start(graph, BTreeMap::new(), &engine, Arc::new(MemoryStore::new())).await;
    let labels = deployment.preview().await.unwrap().labels();

    assert_eq!(labels[0], "create n");
    assert!(
        labels == ["create n", "create a", "create b"] || labels == ["create n", "create b", "create a"]
    );
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_out_of_band_deletion_recreates_only_that_container() {
    let engine = MemoryEngine::new();
    let (deployment, _handle) = start(
        two_containers(),
        BTreeMap::new(),
        &engine,
        Arc::new(MemoryStore::new()),
    )
    .await;
    assert!(deployment.apply().await.unwrap().is_success());

    assert!(engine.remove_out_of_band("a"));
    let plan = deployment.preview().await.unwrap();
    assert_eq!(plan.labels(), vec!["create a"]);

    let applied = deployment.apply().await.unwrap();
    assert_eq!(applied.report.outcome("a"), Some(&Outcome::Created));
    assert_eq!(applied.report.outcome("b"), Some(&Outcome::Unchanged));
    assert!(engine.container("a").unwrap().running);
    assert!(deployment.preview().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_is_contained_to_its_subtree() {
    let mut graph = ResourceGraph::new();
    graph.add_resource(ResourceSpec::network("net")).unwrap();
    graph
        .add_resource(ResourceSpec::image("img").with_property("name", "redis:7-alpine"))
        .unwrap();
    graph.add_resource(container("a")).unwrap();
    graph.add_resource(container("b")).unwrap();
    graph
        .add_resource(container("c").with_property("env", Value::list([Value::reference("a", "name")])))
        .unwrap();
    let graph = graph.resolve_references().unwrap();

    let engine = MemoryEngine::new();
    engine
        .expect_failure(EngineOp::CreateContainer)
        .for_target("a")
        .return_err(AdapterError::Engine("port is already allocated".into()));
    let (deployment, _handle) =
        start(graph, BTreeMap::new(), &engine, Arc::new(MemoryStore::new())).await;
    let report = deployment.apply().await.unwrap().report;

    assert_eq!(report.failed(), vec!["a"]);
    assert_eq!(report.blocked(), vec!["c"]);
    assert_eq!(
        report.outcome("c"),
        Some(&Outcome::Blocked(BlockCause::Dependency("a".into())))
    );
    for unaffected in ["net", "img", "b"] {
        assert_eq!(report.outcome(unaffected), Some(&Outcome::Created));
    }
    engine.verify();
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let engine = MemoryEngine::new();

    let store: Arc<dyn StateStore> = Arc::new(FileStore::new(dir.path()));
    let (deployment, handle) = start(two_containers(), BTreeMap::new(), &engine, store).await;
    assert!(deployment.apply().await.unwrap().is_success());
    drop(deployment);
    handle.await.unwrap();

    let store = FileStore::new(dir.path());
    let saved = store.load("dev").await.unwrap();
    assert_eq!(saved.len(), 4);
    assert!(saved.serial >= 4);

    engine.clear_calls();
    let (deployment, _handle) =
        start(two_containers(), BTreeMap::new(), &engine, Arc::new(store)).await;
    assert!(deployment.preview().await.unwrap().is_empty());
    assert!(engine.calls_of(EngineOp::CreateContainer).is_empty());
}

#[tokio::test]
async fn test_destroy_removes_dependents_first() {
    let engine = MemoryEngine::new();
    let store = MemoryStore::new();
    let (deployment, _handle) = start(
        two_containers(),
        BTreeMap::new(),
        &engine,
        Arc::new(store.clone()),
    )
    .await;
    deployment.apply().await.unwrap();
    engine.clear_calls();

    let applied = deployment.destroy().await.unwrap();
    assert!(applied.is_success(), "{}", applied.report);
    assert_eq!(engine.network_count(), 0);
    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.image_count(), 0);
    assert!(store.saved("dev").unwrap().is_empty());

    let removals: Vec<EngineOp> = engine
        .calls()
        .into_iter()
        .map(|c| c.op)
        .filter(|op| matches!(op, EngineOp::RemoveContainer | EngineOp::RemoveNetwork))
        .collect();
    assert_eq!(removals.last(), Some(&EngineOp::RemoveNetwork));
}

#[tokio::test]
async fn test_outputs_resolve_after_apply() {
    let outputs = BTreeMap::from([
        ("networkId".to_string(), Value::reference("net", "id")),
        ("url".to_string(), Value::from("http://localhost:8081")),
    ]);
    let engine = MemoryEngine::new();
    let (deployment, _handle) =
        start(two_containers(), outputs, &engine, Arc::new(MemoryStore::new())).await;

    assert!(deployment.outputs().await.is_err());
    deployment.apply().await.unwrap();

    let resolved = deployment.outputs().await.unwrap();
    assert_eq!(resolved["networkId"], json!(engine.network("net").unwrap().id));
    assert_eq!(resolved["url"], json!("http://localhost:8081"));
}
