#![forbid(unsafe_code)]

use spirescope_aggregate::{collect, detect, plan, snapshot};
use spirescope_core::{Layout, ResourceRecord, Topology};
use spirescope_kubectl::ScriptedExec;

fn record(name: &str) -> ResourceRecord {
    ResourceRecord(serde_json::json!({"metadata": {"name": name}}))
}

#[tokio::test]
async fn detect_classifies_enterprise_when_both_markers_present() {
    let layout = Layout::default();
    let mut exec = ScriptedExec::new();
    exec.contexts = Some(vec![
        "upstream-spire-cluster".to_string(),
        "downstream-spire-cluster".to_string(),
        "minikube".to_string(),
    ]);
    assert_eq!(detect(&exec, &layout).await, Topology::Enterprise);
}

#[tokio::test]
async fn detect_classifies_basic_with_one_marker_missing() {
    let layout = Layout::default();
    let mut exec = ScriptedExec::new();
    exec.contexts = Some(vec![
        "workload-cluster".to_string(),
        "upstream-spire-cluster".to_string(),
    ]);
    assert_eq!(detect(&exec, &layout).await, Topology::Basic);
}

#[tokio::test]
async fn detect_fails_open_to_basic() {
    let layout = Layout::default();
    let exec = ScriptedExec::new(); // contexts unscripted => executor failure
    assert_eq!(detect(&exec, &layout).await, Topology::Basic);
}

#[tokio::test]
async fn collect_degrades_failed_slots_without_touching_siblings() {
    let layout = Layout::default();
    let queries = plan(Topology::Basic, &layout);
    let mut exec = ScriptedExec::new();
    // Script everything except the pvc query (slot 1), which fails.
    exec.script_list(&queries[0], vec![record("spire-server-0")]);
    exec.script_list(&queries[2], vec![record("spire-server-svc")]);
    exec.script_list(&queries[3], vec![record("spire-agent-a"), record("spire-agent-b")]);
    exec.script_list(&queries[4], vec![record("workload-1")]);

    let results = collect(&exec, &queries).await;
    assert_eq!(results.len(), queries.len());
    assert_eq!(results[0].len(), 1);
    assert!(results[1].is_empty());
    assert_eq!(results[2].len(), 1);
    assert_eq!(results[3].len(), 2);
    assert_eq!(results[4].len(), 1);
}

#[tokio::test]
async fn collect_results_are_positional() {
    let layout = Layout::default();
    let queries = plan(Topology::Enterprise, &layout);
    let mut exec = ScriptedExec::new();
    for (i, q) in queries.iter().enumerate() {
        exec.script_list(q, vec![record(&format!("item-{}", i))]);
    }
    let results = collect(&exec, &queries).await;
    for (i, items) in results.iter().enumerate() {
        assert_eq!(items[0].name(), Some(format!("item-{}", i).as_str()));
    }
}

#[tokio::test]
async fn snapshot_basic_with_timed_out_pvc_query() {
    let layout = Layout::default();
    let queries = plan(Topology::Basic, &layout);
    let mut exec = ScriptedExec::new();
    exec.contexts = Some(vec!["workload-cluster".to_string()]);
    exec.script_list(&queries[0], vec![record("spire-server-0"), record("spire-db-0")]);
    // queries[1] (pvcs) left unscripted: behaves like a timeout.
    exec.script_list(&queries[2], vec![record("spire-server-svc")]);
    exec.script_list(&queries[3], vec![record("spire-agent-a")]);
    exec.script_list(&queries[4], vec![record("workload-1")]);

    let snap = snapshot(&exec, &layout).await.expect("snapshot");
    assert_eq!(snap.deployment_type, Topology::Basic);
    let server = &snap.clusters["workload-cluster"].namespaces["spire-server"];
    assert!(server.pvcs.as_ref().is_some_and(|v| v.is_empty()));
    assert_eq!(server.pods.len(), 2);
    assert_eq!(server.groups["server"].len(), 1);
    assert_eq!(server.groups["database"].len(), 1);
    assert_eq!(
        snap.clusters["workload-cluster"].namespaces["production"].pods.len(),
        1
    );
}

#[tokio::test]
async fn snapshot_enterprise_places_results_under_both_clusters() {
    let layout = Layout::default();
    let queries = plan(Topology::Enterprise, &layout);
    let mut exec = ScriptedExec::new();
    exec.contexts = Some(vec![
        "upstream-spire-cluster".to_string(),
        "downstream-spire-cluster".to_string(),
    ]);
    for q in &queries {
        exec.script_list(q, vec![record("x")]);
    }
    let snap = snapshot(&exec, &layout).await.expect("snapshot");
    assert_eq!(snap.deployment_type, Topology::Enterprise);
    assert!(snap.clusters.contains_key("upstream-spire-cluster"));
    assert!(snap.clusters.contains_key("downstream-spire-cluster"));
    let downstream = &snap.clusters["downstream-spire-cluster"];
    assert_eq!(downstream.namespaces["downstream-workloads"].pods.len(), 1);
    // Enterprise output carries no prefix groups.
    assert!(downstream.namespaces["spire-downstream"].groups.is_empty());
}
