//! Spirescope aggregation core: topology detection, concurrent fan-out over
//! the fixed query set, and normalization into the canonical snapshot tree.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, info, warn};

use spirescope_core::{
    ClusterQuerySpec, ClusterState, Layout, NamespaceState, ResourceKind, ResourceRecord, Snapshot,
    Topology,
};
use spirescope_kubectl::ClusterExec;

/// Classify the deployment from the visible kubeconfig contexts. Detection
/// failure is not snapshot failure: fail open to the smaller basic query set.
pub async fn detect(exec: &dyn ClusterExec, layout: &Layout) -> Topology {
    match exec.contexts().await {
        Ok(names) => {
            let has_upstream = names.iter().any(|n| n.contains(&layout.upstream_context));
            let has_downstream = names.iter().any(|n| n.contains(&layout.downstream_context));
            let topology = if has_upstream && has_downstream {
                Topology::Enterprise
            } else {
                Topology::Basic
            };
            debug!(%topology, contexts = names.len(), "detect: classified");
            topology
        }
        Err(e) => {
            warn!(error = %e, "detect: context listing failed; assuming basic");
            Topology::Basic
        }
    }
}

/// The fixed, ordered query set for a topology. Downstream unpacking is
/// positional, so the order here is part of the contract.
pub fn plan(topology: Topology, layout: &Layout) -> Vec<ClusterQuerySpec> {
    match topology {
        Topology::Basic => vec![
            ClusterQuerySpec::list(&layout.workload_context, &layout.server_namespace, ResourceKind::Pod),
            ClusterQuerySpec::list(&layout.workload_context, &layout.server_namespace, ResourceKind::Pvc),
            ClusterQuerySpec::list(&layout.workload_context, &layout.server_namespace, ResourceKind::Service),
            ClusterQuerySpec::list(&layout.workload_context, &layout.agent_namespace, ResourceKind::Pod),
            ClusterQuerySpec::list(&layout.workload_context, &layout.workload_namespace, ResourceKind::Pod),
        ],
        Topology::Enterprise => vec![
            ClusterQuerySpec::list(&layout.upstream_context, &layout.upstream_namespace, ResourceKind::Pod),
            ClusterQuerySpec::list(&layout.upstream_context, &layout.upstream_namespace, ResourceKind::Service),
            ClusterQuerySpec::list(&layout.upstream_context, &layout.upstream_namespace, ResourceKind::Pvc),
            ClusterQuerySpec::list(&layout.downstream_context, &layout.downstream_namespace, ResourceKind::Pod),
            ClusterQuerySpec::list(&layout.downstream_context, &layout.downstream_namespace, ResourceKind::Service),
            ClusterQuerySpec::list(&layout.downstream_context, &layout.downstream_namespace, ResourceKind::Pvc),
            ClusterQuerySpec::list(&layout.downstream_context, &layout.downstream_workload_namespace, ResourceKind::Pod),
            ClusterQuerySpec::list(&layout.downstream_context, &layout.downstream_workload_namespace, ResourceKind::Service),
        ],
    }
}

/// Issue every query in the plan concurrently and wait for all of them.
/// Each slot degrades to an empty item list on its own failure; one query can
/// never abort a sibling. The result is positional: slot i belongs to plan
/// entry i regardless of completion order.
pub async fn collect(exec: &dyn ClusterExec, plan: &[ClusterQuerySpec]) -> Vec<Vec<ResourceRecord>> {
    let queries = plan.iter().map(|spec| async move {
        match exec.list(spec).await {
            Ok(items) => items,
            Err(e) => {
                metrics::counter!("snapshot_queries_degraded_total", 1u64);
                warn!(command = %spec.command_string(), error = %e, "collect: query degraded to empty");
                Vec::new()
            }
        }
    });
    join_all(queries).await
}

/// Reshape raw positional results into the canonical snapshot. Pure and
/// deterministic; missing slots read as empty so every declared key is
/// always present in the output.
pub fn normalize(topology: Topology, layout: &Layout, mut raw: Vec<Vec<ResourceRecord>>) -> Snapshot {
    let mut clusters: BTreeMap<String, ClusterState> = BTreeMap::new();
    match topology {
        Topology::Basic => {
            let server_pods = slot(&mut raw, 0);
            let server_pvcs = slot(&mut raw, 1);
            let server_services = slot(&mut raw, 2);
            let agent_pods = slot(&mut raw, 3);
            let workload_pods = slot(&mut raw, 4);

            let mut namespaces = BTreeMap::new();
            namespaces.insert(
                layout.server_namespace.clone(),
                NamespaceState {
                    groups: bucket(
                        &server_pods,
                        &[
                            ("server", layout.server_prefix.as_str()),
                            ("database", layout.database_prefix.as_str()),
                        ],
                    ),
                    pods: server_pods,
                    services: Some(server_services),
                    pvcs: Some(server_pvcs),
                },
            );
            namespaces.insert(
                layout.agent_namespace.clone(),
                NamespaceState {
                    groups: bucket(&agent_pods, &[("agent", layout.agent_prefix.as_str())]),
                    pods: agent_pods,
                    services: None,
                    pvcs: None,
                },
            );
            namespaces.insert(
                layout.workload_namespace.clone(),
                NamespaceState::pods_only(workload_pods),
            );
            clusters.insert(layout.workload_context.clone(), ClusterState { namespaces });
        }
        Topology::Enterprise => {
            let upstream_pods = slot(&mut raw, 0);
            let upstream_services = slot(&mut raw, 1);
            let upstream_pvcs = slot(&mut raw, 2);
            let downstream_pods = slot(&mut raw, 3);
            let downstream_services = slot(&mut raw, 4);
            let downstream_pvcs = slot(&mut raw, 5);
            let dw_pods = slot(&mut raw, 6);
            let dw_services = slot(&mut raw, 7);

            let mut upstream = BTreeMap::new();
            upstream.insert(
                layout.upstream_namespace.clone(),
                NamespaceState {
                    pods: upstream_pods,
                    services: Some(upstream_services),
                    pvcs: Some(upstream_pvcs),
                    groups: BTreeMap::new(),
                },
            );
            clusters.insert(
                layout.upstream_context.clone(),
                ClusterState { namespaces: upstream },
            );

            let mut downstream = BTreeMap::new();
            downstream.insert(
                layout.downstream_namespace.clone(),
                NamespaceState {
                    pods: downstream_pods,
                    services: Some(downstream_services),
                    pvcs: Some(downstream_pvcs),
                    groups: BTreeMap::new(),
                },
            );
            downstream.insert(
                layout.downstream_workload_namespace.clone(),
                NamespaceState {
                    pods: dw_pods,
                    services: Some(dw_services),
                    pvcs: None,
                    groups: BTreeMap::new(),
                },
            );
            clusters.insert(
                layout.downstream_context.clone(),
                ClusterState { namespaces: downstream },
            );
        }
    }
    Snapshot {
        deployment_type: topology,
        clusters,
    }
}

/// Detect, fan out, normalize. Individual query failures are absorbed inside
/// `collect`; this only errs on internal invariant breakage.
pub async fn snapshot(exec: &dyn ClusterExec, layout: &Layout) -> Result<Snapshot> {
    let topology = detect(exec, layout).await;
    let queries = plan(topology, layout);
    let raw = collect(exec, &queries).await;
    info!(%topology, queries = queries.len(), "snapshot collected");
    Ok(normalize(topology, layout, raw))
}

fn slot(raw: &mut Vec<Vec<ResourceRecord>>, i: usize) -> Vec<ResourceRecord> {
    raw.get_mut(i).map(std::mem::take).unwrap_or_default()
}

/// Sub-classify items by name prefix: exact case-sensitive test, first
/// matching bucket wins, unmatched items stay only in the raw list. Every
/// bucket key is present even when empty.
fn bucket(
    items: &[ResourceRecord],
    prefixes: &[(&str, &str)],
) -> BTreeMap<String, Vec<ResourceRecord>> {
    let mut out: BTreeMap<String, Vec<ResourceRecord>> = prefixes
        .iter()
        .map(|(key, _)| ((*key).to_string(), Vec::new()))
        .collect();
    for item in items {
        let Some(name) = item.name() else { continue };
        if let Some((key, _)) = prefixes.iter().find(|(_, p)| name.starts_with(p)) {
            if let Some(slot) = out.get_mut(*key) {
                slot.push(item.clone());
            }
        }
    }
    out
}
