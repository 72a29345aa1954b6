//! The demo manifest loads and its tools behave as documented.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use tool_sandbox::sandbox::ValidationPhase;
use tool_sandbox::{ExecutionResult, ExecutorConfig, ManifestCatalog, SandboxManager, ToolCatalog};

fn demo_manager() -> SandboxManager {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join("tools.yaml");
    let catalog = ManifestCatalog::load(&manifest).unwrap();
    SandboxManager::new(ExecutorConfig::default(), Arc::new(catalog)).unwrap()
}

#[tokio::test]
async fn manifest_lists_demo_tools() {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos")
        .join("tools.yaml");
    let catalog = ManifestCatalog::load(&manifest).unwrap();
    let names: Vec<String> = catalog
        .list()
        .await
        .into_iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(names, vec!["echo@1.0.0", "spin@1.0.0"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_demo_round_trips() {
    let mgr = demo_manager();
    let input = json!({"message": "hello"});
    let result = mgr
        .execute("echo", "1.0.0", input.clone(), Duration::from_secs(5))
        .await;
    assert_eq!(result, ExecutionResult::Success { value: input });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn echo_demo_rejects_bad_input() {
    let mgr = demo_manager();
    match mgr
        .execute("echo", "1.0.0", json!({"msg": 1}), Duration::from_secs(5))
        .await
    {
        ExecutionResult::ValidationError { phase, details } => {
            assert_eq!(phase, ValidationPhase::Input);
            assert_eq!(details.len(), 2, "{details:?}");
        }
        other => panic!("expected ValidationError, got: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spin_demo_times_out() {
    let mgr = demo_manager();
    let result = mgr
        .execute("spin", "1.0.0", json!({}), Duration::from_secs(5))
        .await;
    assert!(
        matches!(result, ExecutionResult::Timeout { .. }),
        "got: {result:?}"
    );
}
