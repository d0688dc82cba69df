//! Spirescope resource inspector: allow-list validation, single-resource
//! describe, and the identity enrichment sub-protocol for workload pods.

#![forbid(unsafe_code)]

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, warn};

use spirescope_core::{
    ClusterQuerySpec, DescribeRequest, Layout, ResourceKind, SpirescopeError, SpirescopeResult,
};
use spirescope_kubectl::ClusterExec;
use spirescope_spiffe::IdentityEntry;

/// Echo of the validated request fields, returned alongside the output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResourceEcho {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    pub context: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeResponse {
    pub output: String,
    pub command: String,
    pub resource: ResourceEcho,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spiffe_info: Option<IdentityEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_labels: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced: Option<bool>,
}

pub struct Inspector {
    exec: Arc<dyn ClusterExec>,
    layout: Layout,
}

impl Inspector {
    pub fn new(exec: Arc<dyn ClusterExec>, layout: Layout) -> Self {
        Self { exec, layout }
    }

    /// Validate the request against the allow-lists, then describe. Nothing
    /// touches the cluster for a rejected request.
    pub async fn describe(&self, req: &DescribeRequest) -> SpirescopeResult<DescribeResponse> {
        let spec = ClusterQuerySpec::describe(&req.context, &req.namespace, req.kind, &req.name);
        self.validate(req, &spec)?;
        if req.kind == ResourceKind::Pod && req.namespace == self.layout.workload_namespace {
            self.describe_enriched(req, &spec).await
        } else {
            self.describe_plain(req, &spec).await
        }
    }

    fn validate(&self, req: &DescribeRequest, spec: &ClusterQuerySpec) -> SpirescopeResult<()> {
        let context_ok = self.layout.allowed_contexts.iter().any(|c| c == &req.context);
        let namespace_ok = self
            .layout
            .allowed_namespaces
            .iter()
            .any(|n| n == &req.namespace);
        if !(context_ok && namespace_ok) {
            metrics::counter!("describe_rejected_total", 1u64);
            warn!(command = %spec.command_string(), "describe: rejected by allow-list");
            return Err(SpirescopeError::Validation(
                "Invalid resource parameters".to_string(),
            ));
        }
        Ok(())
    }

    async fn describe_plain(
        &self,
        req: &DescribeRequest,
        spec: &ClusterQuerySpec,
    ) -> SpirescopeResult<DescribeResponse> {
        let output = self
            .exec
            .describe(spec)
            .await
            .map_err(|e| describe_failed(spec, e))?;
        Ok(DescribeResponse {
            output,
            command: spec.command_string(),
            resource: echo(req),
            spiffe_info: None,
            pod_labels: None,
            service_account: None,
            enhanced: None,
        })
    }

    /// Pod detail in the workload namespace: the primary describe plus three
    /// secondary identity queries, all concurrent. Only the primary describe
    /// can fail the request; the secondaries degrade to defaults.
    async fn describe_enriched(
        &self,
        req: &DescribeRequest,
        spec: &ClusterQuerySpec,
    ) -> SpirescopeResult<DescribeResponse> {
        let (primary, entries, labels, account) = tokio::join!(
            self.exec.describe(spec),
            self.exec.registration_entries(&req.context),
            self.exec.pod_labels(&req.context, &req.namespace, &req.name),
            self.exec.service_account(&req.context, &req.namespace, &req.name),
        );

        let output = primary.map_err(|e| describe_failed(spec, e))?;

        let entries = entries.unwrap_or_else(|e| {
            metrics::counter!("enrichment_queries_degraded_total", 1u64);
            warn!(pod = %req.name, error = %e, "describe: entry listing unavailable");
            String::new()
        });
        let pod_labels = labels.unwrap_or_else(|e| {
            metrics::counter!("enrichment_queries_degraded_total", 1u64);
            warn!(pod = %req.name, error = %e, "describe: pod labels unavailable");
            serde_json::json!({})
        });
        let service_account = match account {
            Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
            Ok(_) => "default".to_string(),
            Err(e) => {
                metrics::counter!("enrichment_queries_degraded_total", 1u64);
                warn!(pod = %req.name, error = %e, "describe: service account unavailable");
                "default".to_string()
            }
        };

        let spiffe_info = spirescope_spiffe::correlate(&entries, &req.namespace, &service_account)
            .unwrap_or_else(IdentityEntry::unregistered);

        Ok(DescribeResponse {
            output,
            command: spec.command_string(),
            resource: echo(req),
            spiffe_info: Some(spiffe_info),
            pod_labels: Some(pod_labels),
            service_account: Some(service_account),
            enhanced: Some(true),
        })
    }
}

fn echo(req: &DescribeRequest) -> ResourceEcho {
    ResourceEcho {
        kind: req.kind,
        name: req.name.clone(),
        namespace: req.namespace.clone(),
        context: req.context.clone(),
    }
}

fn describe_failed(spec: &ClusterQuerySpec, e: anyhow::Error) -> SpirescopeError {
    let command = spec.command_string();
    error!(command = %command, error = %e, "describe: primary query failed");
    SpirescopeError::DescribeFailed {
        command,
        details: format!("{:#}", e),
    }
}
