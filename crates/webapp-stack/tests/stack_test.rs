use serde_json::json;
use stack_engine::adapter::{EngineOp, MemoryEngine};
use stack_engine::error::AdapterError;
use stack_engine::{BlockCause, Outcome};
use webapp_stack::templates::{self, INDEX_HTML_PATH, NGINX_CONF_PATH};
use webapp_stack::{ResourceNames, StackParams, StackSystem};

async fn system(stack: &str, engine: &MemoryEngine) -> StackSystem {
    StackSystem::in_memory(&StackParams::for_stack(stack), engine.clone())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_prod_and_dev_publish_different_ports() {
    for (stack, url, redis_port, redis_export) in [
        ("prod", "http://localhost:8080", 9080, 7080),
        ("dev", "http://localhost:8081", 9081, 7081),
    ] {
        let engine = MemoryEngine::new();
        let system = system(stack, &engine).await;
        assert!(system.deployment.apply().await.unwrap().is_success());

        let outputs = system.deployment.outputs().await.unwrap();
        assert_eq!(outputs["nginxUrl"], json!(url));
        assert_eq!(outputs["redisPort"], json!(redis_export));
        let redis = engine.container_config(&format!("redis-{stack}")).unwrap();
        assert_eq!(redis.ports[0].external, redis_port);
        system.shutdown().await.unwrap();
    }
}

#[tokio::test]
async fn test_apply_creates_the_whole_stack() {
    let engine = MemoryEngine::new();
    let system = system("dev", &engine).await;

    let applied = system.deployment.apply().await.unwrap();
    assert!(applied.is_success());
    for name in ResourceNames::new("dev").all() {
        assert_eq!(applied.report.outcome(name), Some(&Outcome::Created), "{name}");
    }

    assert!(engine.network("webapp-network-dev").is_some());
    assert!(engine.container("redis-dev").is_some());
    assert!(engine.container("nginx-dev").is_some());
    assert_eq!(engine.image_count(), 2);
    assert_eq!(
        engine.file("nginx-dev", NGINX_CONF_PATH),
        Some(templates::nginx_conf())
    );
    let page = engine.file("nginx-dev", INDEX_HTML_PATH).unwrap();
    assert!(page.contains("Docker Stack Demo - dev"));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_apply_changes_nothing() {
    let engine = MemoryEngine::new();
    let system = system("dev", &engine).await;
    system.deployment.apply().await.unwrap();
    engine.clear_calls();

    let applied = system.deployment.apply().await.unwrap();
    assert!(applied.plan.is_empty());
    assert!(applied.is_success());
    for op in [
        EngineOp::CreateNetwork,
        EngineOp::PullImage,
        EngineOp::CreateContainer,
        EngineOp::RemoveContainer,
    ] {
        assert!(engine.calls_of(op).is_empty(), "{op:?}");
    }
    assert_eq!(engine.copy_count(), 0);

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deleted_nginx_is_recreated_alone() {
    let engine = MemoryEngine::new();
    let system = system("dev", &engine).await;
    system.deployment.apply().await.unwrap();

    assert!(engine.remove_out_of_band("nginx-dev"));
    let plan = system.deployment.preview().await.unwrap();
    assert_eq!(plan.labels(), vec!["create dev-nginx"]);

    let applied = system.deployment.apply().await.unwrap();
    assert!(applied.is_success());
    assert_eq!(applied.report.outcome("dev-redis"), Some(&Outcome::Unchanged));
    assert!(engine.container("nginx-dev").is_some());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_redis_failure_blocks_nginx_only() {
    let engine = MemoryEngine::new();
    engine
        .expect_failure(EngineOp::CreateContainer)
        .for_target("redis-dev")
        .times(1)
        .return_err(AdapterError::Engine("port is already allocated".into()));
    let system = system("dev", &engine).await;

    let applied = system.deployment.apply().await.unwrap();
    assert!(!applied.is_success());
    assert_eq!(applied.report.failed(), vec!["dev-redis"]);
    assert_eq!(
        applied.report.outcome("dev-nginx"),
        Some(&Outcome::Blocked(BlockCause::Dependency("dev-redis".into())))
    );
    assert_eq!(applied.report.outcome("dev-network"), Some(&Outcome::Created));
    assert_eq!(applied.report.outcome("dev-nginx-image"), Some(&Outcome::Created));
    assert!(engine.container("nginx-dev").is_none());
    engine.verify();

    // the fault is spent; the next apply finishes the job
    let plan = system.deployment.preview().await.unwrap();
    assert_eq!(plan.labels(), vec!["create dev-redis", "create dev-nginx"]);
    assert!(system.deployment.apply().await.unwrap().is_success());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_redis_that_failed_to_start_is_started_by_next_apply() {
    let engine = MemoryEngine::new();
    engine
        .expect_failure(EngineOp::StartContainer)
        .times(1)
        .return_err(AdapterError::Engine("port is already allocated".into()));
    let system = system("dev", &engine).await;

    let applied = system.deployment.apply().await.unwrap();
    assert_eq!(applied.report.failed(), vec!["dev-redis"]);
    assert_eq!(applied.report.blocked(), vec!["dev-nginx"]);
    let redis_id = engine.container("redis-dev").unwrap().id;
    assert!(!engine.container("redis-dev").unwrap().running);
    engine.verify();

    let plan = system.deployment.preview().await.unwrap();
    assert_eq!(plan.labels(), vec!["update dev-redis", "create dev-nginx"]);

    let applied = system.deployment.apply().await.unwrap();
    assert!(applied.is_success(), "{}", applied.report);
    assert_eq!(applied.report.outcome("dev-redis"), Some(&Outcome::Updated));
    assert_eq!(applied.report.outcome("dev-nginx"), Some(&Outcome::Created));
    let redis = engine.container("redis-dev").unwrap();
    assert_eq!(redis.id, redis_id);
    assert!(redis.running);
    assert!(engine.container("nginx-dev").unwrap().running);
    assert!(system.deployment.preview().await.unwrap().is_empty());

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_outputs_before_apply_are_unavailable() {
    let engine = MemoryEngine::new();
    let system = system("dev", &engine).await;

    let err = system.deployment.outputs().await.unwrap_err();
    assert!(err.to_string().contains("has the stack been applied?"), "{err}");

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_component_and_stack_info_outputs() {
    let engine = MemoryEngine::new();
    let system = system("dev", &engine).await;
    system.deployment.apply().await.unwrap();

    let outputs = system.deployment.outputs().await.unwrap();
    assert_eq!(
        outputs["stackInfo"],
        json!({
            "name": "dev",
            "nginxContainer": "nginx-dev",
            "redisContainer": "redis-dev",
        })
    );

    let component = system.deployment.component_outputs("dev").await.unwrap();
    let nginx_id = engine.container("nginx-dev").unwrap().id;
    assert_eq!(component["nginxContainerId"], json!(nginx_id));
    assert!(component["networkId"].as_str().unwrap().starts_with("net-"));

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_destroy_then_outputs_are_gone() {
    let engine = MemoryEngine::new();
    let system = system("dev", &engine).await;
    system.deployment.apply().await.unwrap();

    let destroyed = system.deployment.destroy().await.unwrap();
    assert!(destroyed.is_success());
    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.network_count(), 0);
    assert!(system.deployment.outputs().await.is_err());

    system.shutdown().await.unwrap();
}
