//! Spirescope core types and errors.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Detected deployment shape. Computed once per snapshot request, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    Basic,
    Enterprise,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Basic => f.write_str("basic"),
            Topology::Enterprise => f.write_str("enterprise"),
        }
    }
}

/// Resource categories the dashboard may query. The enum doubles as the
/// resource-kind allow-list: anything that does not parse is rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Service,
    Pvc,
    Deployment,
    Daemonset,
    Statefulset,
}

impl ResourceKind {
    /// Parse a URL path segment (exact, case-sensitive).
    pub fn from_segment(s: &str) -> Option<Self> {
        match s {
            "pod" => Some(Self::Pod),
            "service" => Some(Self::Service),
            "pvc" => Some(Self::Pvc),
            "deployment" => Some(Self::Deployment),
            "daemonset" => Some(Self::Daemonset),
            "statefulset" => Some(Self::Statefulset),
            _ => None,
        }
    }

    /// The noun kubectl expects on the command line.
    pub fn kubectl_noun(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Service => "svc",
            Self::Pvc => "pvc",
            Self::Deployment => "deployment",
            Self::Daemonset => "daemonset",
            Self::Statefulset => "statefulset",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Service => "service",
            Self::Pvc => "pvc",
            Self::Deployment => "deployment",
            Self::Daemonset => "daemonset",
            Self::Statefulset => "statefulset",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    List,
    Describe,
}

/// Immutable description of one read-only cluster query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterQuerySpec {
    pub context: String,
    pub namespace: String,
    pub kind: ResourceKind,
    pub mode: QueryMode,
    /// Target object name; only meaningful in describe mode.
    pub target: Option<String>,
}

impl ClusterQuerySpec {
    pub fn list(context: &str, namespace: &str, kind: ResourceKind) -> Self {
        Self {
            context: context.to_string(),
            namespace: namespace.to_string(),
            kind,
            mode: QueryMode::List,
            target: None,
        }
    }

    pub fn describe(context: &str, namespace: &str, kind: ResourceKind, name: &str) -> Self {
        Self {
            context: context.to_string(),
            namespace: namespace.to_string(),
            kind,
            mode: QueryMode::Describe,
            target: Some(name.to_string()),
        }
    }

    /// kubectl argv for this query (without the program name).
    pub fn argv(&self) -> Vec<String> {
        let mut args = vec![
            "--context".to_string(),
            self.context.clone(),
            "-n".to_string(),
            self.namespace.clone(),
        ];
        match self.mode {
            QueryMode::List => {
                args.push("get".to_string());
                args.push(self.kind.kubectl_noun().to_string());
                args.push("-o".to_string());
                args.push("json".to_string());
            }
            QueryMode::Describe => {
                args.push("describe".to_string());
                args.push(self.kind.kubectl_noun().to_string());
                if let Some(name) = &self.target {
                    args.push(name.clone());
                }
            }
        }
        args
    }

    /// Rendered command line, used in logs and error echoes.
    pub fn command_string(&self) -> String {
        let mut s = String::from("kubectl");
        for a in self.argv() {
            s.push(' ');
            s.push_str(&a);
        }
        s
    }
}

/// One raw resource as returned by the cluster. Opaque pass-through except
/// for the name, which prefix bucketing reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRecord(pub serde_json::Value);

impl ResourceRecord {
    pub fn name(&self) -> Option<&str> {
        self.0.get("metadata")?.get("name")?.as_str()
    }
}

impl From<serde_json::Value> for ResourceRecord {
    fn from(v: serde_json::Value) -> Self {
        Self(v)
    }
}

/// Per-namespace slice of the snapshot. Only the resource kinds the topology
/// declares for a namespace are serialized; a declared-but-degraded kind is an
/// empty sequence, never a missing key.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct NamespaceState {
    pub pods: Vec<ResourceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ResourceRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvcs: Option<Vec<ResourceRecord>>,
    /// Name-prefix buckets, derived from `pods` (basic topology only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, Vec<ResourceRecord>>,
}

impl NamespaceState {
    pub fn pods_only(pods: Vec<ResourceRecord>) -> Self {
        Self {
            pods,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClusterState {
    pub namespaces: BTreeMap<String, NamespaceState>,
}

/// Canonical aggregated output: cluster -> namespace -> resource kind -> items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    #[serde(rename = "deploymentType")]
    pub deployment_type: Topology,
    pub clusters: BTreeMap<String, ClusterState>,
}

/// Single-resource detail request, parsed from
/// `/api/describe/{kind}/{namespace}/{context}/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescribeRequest {
    pub kind: ResourceKind,
    pub namespace: String,
    pub context: String,
    pub name: String,
}

impl DescribeRequest {
    /// Build from path segments. Wrong arity or an unknown kind is a
    /// validation rejection; no cluster query may run for such a request.
    pub fn from_segments(segments: &[&str]) -> SpirescopeResult<Self> {
        let [kind, namespace, context, name] = segments else {
            return Err(SpirescopeError::Validation(
                "Invalid resource parameters".to_string(),
            ));
        };
        let kind = ResourceKind::from_segment(kind).ok_or_else(|| {
            SpirescopeError::Validation("Invalid resource parameters".to_string())
        })?;
        Ok(Self {
            kind,
            namespace: (*namespace).to_string(),
            context: (*context).to_string(),
            name: (*name).to_string(),
        })
    }
}

/// Fixed deployment shape: context markers, namespaces, allow-lists and
/// bucket prefixes. Built once at process start and shared immutably;
/// defaults match the reference deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Layout {
    pub workload_context: String,
    pub upstream_context: String,
    pub downstream_context: String,
    pub server_namespace: String,
    pub agent_namespace: String,
    /// Namespace whose pod describes run the identity enrichment path.
    pub workload_namespace: String,
    pub upstream_namespace: String,
    pub downstream_namespace: String,
    pub downstream_workload_namespace: String,
    pub server_prefix: String,
    pub database_prefix: String,
    pub agent_prefix: String,
    pub allowed_contexts: Vec<String>,
    pub allowed_namespaces: Vec<String>,
}

impl Default for Layout {
    fn default() -> Self {
        let workload_context = "workload-cluster".to_string();
        let upstream_context = "upstream-spire-cluster".to_string();
        let downstream_context = "downstream-spire-cluster".to_string();
        let server_namespace = "spire-server".to_string();
        let agent_namespace = "spire-system".to_string();
        let workload_namespace = "production".to_string();
        let upstream_namespace = "spire-upstream".to_string();
        let downstream_namespace = "spire-downstream".to_string();
        let downstream_workload_namespace = "downstream-workloads".to_string();
        Self {
            allowed_contexts: vec![
                workload_context.clone(),
                upstream_context.clone(),
                downstream_context.clone(),
            ],
            allowed_namespaces: vec![
                server_namespace.clone(),
                agent_namespace.clone(),
                workload_namespace.clone(),
                upstream_namespace.clone(),
                downstream_namespace.clone(),
                downstream_workload_namespace.clone(),
            ],
            workload_context,
            upstream_context,
            downstream_context,
            server_namespace,
            agent_namespace,
            workload_namespace,
            upstream_namespace,
            downstream_namespace,
            downstream_workload_namespace,
            server_prefix: "spire-server".to_string(),
            database_prefix: "spire-db".to_string(),
            agent_prefix: "spire-agent".to_string(),
        }
    }
}

/// Errors surfaced to callers; everything else degrades locally.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum SpirescopeError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("describe failed: {details}")]
    DescribeFailed { command: String, details: String },
    #[error("executor: {0}")]
    Executor(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type SpirescopeResult<T> = Result<T, SpirescopeError>;
