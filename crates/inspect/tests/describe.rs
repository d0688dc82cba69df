#![forbid(unsafe_code)]

use std::sync::Arc;

use spirescope_core::{ClusterQuerySpec, DescribeRequest, Layout, ResourceKind, SpirescopeError};
use spirescope_inspect::Inspector;
use spirescope_kubectl::ScriptedExec;

const ENTRIES: &str = "\
Found 1 entry

Entry ID         : 8c3a1e54-0b6d-44a1-bb6e-222222222222
SPIFFE ID        : spiffe://example.org/workload
Parent ID        : spiffe://example.org/ns/spire-system/sa/spire-agent
TTL              : 3600
Selector         : k8s:ns:production
Selector         : k8s:sa:default
";

fn request(kind: ResourceKind, namespace: &str, context: &str, name: &str) -> DescribeRequest {
    DescribeRequest {
        kind,
        namespace: namespace.to_string(),
        context: context.to_string(),
        name: name.to_string(),
    }
}

fn inspector(exec: ScriptedExec) -> (Inspector, Arc<ScriptedExec>) {
    let exec = Arc::new(exec);
    (
        Inspector::new(exec.clone(), Layout::default()),
        exec,
    )
}

#[tokio::test]
async fn rejected_namespace_issues_zero_queries() {
    let (inspector, exec) = inspector(ScriptedExec::new());
    let req = request(ResourceKind::Pod, "kube-system", "workload-cluster", "my-pod");
    let err = inspector.describe(&req).await.unwrap_err();
    assert!(matches!(err, SpirescopeError::Validation(_)));
    assert!(exec.calls().is_empty());
}

#[tokio::test]
async fn rejected_context_issues_zero_queries() {
    let (inspector, exec) = inspector(ScriptedExec::new());
    let req = request(ResourceKind::Pod, "production", "other-cluster", "my-pod");
    let err = inspector.describe(&req).await.unwrap_err();
    assert!(matches!(err, SpirescopeError::Validation(_)));
    assert!(exec.calls().is_empty());
}

#[tokio::test]
async fn plain_describe_returns_output_and_command_echo() {
    let mut exec = ScriptedExec::new();
    let spec = ClusterQuerySpec::describe(
        "workload-cluster",
        "spire-server",
        ResourceKind::Service,
        "spire-server-svc",
    );
    exec.script_describe(&spec, "Name: spire-server-svc\nType: ClusterIP\n");
    let (inspector, exec) = inspector(exec);
    let req = request(
        ResourceKind::Service,
        "spire-server",
        "workload-cluster",
        "spire-server-svc",
    );

    let resp = inspector.describe(&req).await.expect("describe");
    assert!(resp.output.contains("ClusterIP"));
    assert_eq!(resp.command, spec.command_string());
    assert_eq!(resp.resource.name, "spire-server-svc");
    assert!(resp.spiffe_info.is_none());
    assert!(resp.enhanced.is_none());
    assert_eq!(exec.calls().len(), 1);
}

#[tokio::test]
async fn workload_pod_describe_is_enriched_with_identity() {
    let mut exec = ScriptedExec::new();
    let spec =
        ClusterQuerySpec::describe("workload-cluster", "production", ResourceKind::Pod, "my-pod");
    exec.script_describe(&spec, "Name: my-pod\nStatus: Running\n");
    exec.entries = Some(ENTRIES.to_string());
    exec.labels = Some(serde_json::json!({"app": "frontend"}));
    exec.service_account = Some("default".to_string());
    let (inspector, _exec) = inspector(exec);
    let req = request(ResourceKind::Pod, "production", "workload-cluster", "my-pod");

    let resp = inspector.describe(&req).await.expect("describe");
    assert_eq!(resp.enhanced, Some(true));
    assert_eq!(resp.service_account.as_deref(), Some("default"));
    assert_eq!(resp.pod_labels, Some(serde_json::json!({"app": "frontend"})));
    let info = resp.spiffe_info.expect("spiffe info");
    assert!(info.has_registration);
    assert_eq!(info.spiffe_id.as_deref(), Some("spiffe://example.org/workload"));
    assert_eq!(info.ttl.as_deref(), Some("3600"));
}

#[tokio::test]
async fn primary_describe_failure_fails_the_request() {
    let mut exec = ScriptedExec::new();
    // Secondaries succeed; the primary describe is unscripted and fails.
    exec.entries = Some(ENTRIES.to_string());
    exec.labels = Some(serde_json::json!({}));
    exec.service_account = Some("default".to_string());
    let (inspector, _exec) = inspector(exec);
    let req = request(ResourceKind::Pod, "production", "workload-cluster", "my-pod");

    let err = inspector.describe(&req).await.unwrap_err();
    match err {
        SpirescopeError::DescribeFailed { command, details } => {
            assert!(command.contains("describe pod my-pod"));
            assert!(details.contains("scripted failure"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn secondary_failures_degrade_to_defaults() {
    let mut exec = ScriptedExec::new();
    let spec =
        ClusterQuerySpec::describe("workload-cluster", "production", ResourceKind::Pod, "my-pod");
    exec.script_describe(&spec, "Name: my-pod\n");
    // entries, labels and service account all unscripted => failures.
    let (inspector, _exec) = inspector(exec);
    let req = request(ResourceKind::Pod, "production", "workload-cluster", "my-pod");

    let resp = inspector.describe(&req).await.expect("describe");
    assert_eq!(resp.enhanced, Some(true));
    assert_eq!(resp.service_account.as_deref(), Some("default"));
    assert_eq!(resp.pod_labels, Some(serde_json::json!({})));
    let info = resp.spiffe_info.expect("spiffe info");
    assert!(!info.has_registration);
    assert!(info.spiffe_id.is_none());
}

#[tokio::test]
async fn unset_service_account_falls_back_to_default() {
    let mut exec = ScriptedExec::new();
    let spec =
        ClusterQuerySpec::describe("workload-cluster", "production", ResourceKind::Pod, "my-pod");
    exec.script_describe(&spec, "Name: my-pod\n");
    exec.entries = Some(ENTRIES.to_string());
    exec.labels = Some(serde_json::json!({}));
    exec.service_account = Some("  \n".to_string());
    let (inspector, _exec) = inspector(exec);
    let req = request(ResourceKind::Pod, "production", "workload-cluster", "my-pod");

    let resp = inspector.describe(&req).await.expect("describe");
    assert_eq!(resp.service_account.as_deref(), Some("default"));
    // The fallback account still correlates against the listing.
    assert!(resp.spiffe_info.expect("spiffe info").has_registration);
}

#[tokio::test]
async fn non_workload_namespace_pod_is_not_enriched() {
    let mut exec = ScriptedExec::new();
    let spec = ClusterQuerySpec::describe(
        "workload-cluster",
        "spire-system",
        ResourceKind::Pod,
        "spire-agent-x",
    );
    exec.script_describe(&spec, "Name: spire-agent-x\n");
    let (inspector, exec) = inspector(exec);
    let req = request(
        ResourceKind::Pod,
        "spire-system",
        "workload-cluster",
        "spire-agent-x",
    );

    let resp = inspector.describe(&req).await.expect("describe");
    assert!(resp.spiffe_info.is_none());
    assert!(resp.enhanced.is_none());
    assert_eq!(exec.calls().len(), 1);
}
