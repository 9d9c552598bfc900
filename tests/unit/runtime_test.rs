//! Tests for the engine actor

use threshold_engine::builders::EngineBuilder;
use threshold_engine::core::EngineError;
use threshold_engine::mesh::TokenSecret;
use threshold_engine::runtime::EngineActor;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_actor_call_returns_value() {
    let engine = EngineBuilder::new()
        .with_secret(TokenSecret::new(vec![3u8; 32]).unwrap())
        .build()
        .unwrap();
    let handle = EngineActor::spawn(engine);

    let depth = handle
        .call(|engine| engine.status().scheduler.queue_len)
        .await
        .expect("actor reply");
    assert_eq!(depth, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_actor_spawn_on_handle() {
    let engine = EngineBuilder::new()
        .with_secret(TokenSecret::new(vec![3u8; 32]).unwrap())
        .build()
        .unwrap();
    let handle = EngineActor::spawn_on(engine, &tokio::runtime::Handle::current());
    assert!(!handle.is_closed());

    let chains = handle
        .call(|engine| engine.verify_all_chains().map(|c| c.len()))
        .await
        .expect("actor reply");
    assert_eq!(chains.unwrap(), 5);
}

#[test]
fn test_call_after_runtime_shutdown_reports_closed() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = EngineBuilder::new()
        .with_secret(TokenSecret::new(vec![3u8; 32]).unwrap())
        .build()
        .unwrap();
    let handle = EngineActor::spawn_on(engine, runtime.handle());
    drop(runtime);

    let caller = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let result = caller.block_on(handle.call(|engine| engine.status()));
    assert!(matches!(result, Err(EngineError::ActorClosed)));
    assert!(handle.is_closed());
}
