//! Spirescope cluster query executor: read-only kubectl invocations behind a
//! trait so the aggregation core is testable with scripted results.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::process::Command;
use tracing::debug;

use spirescope_core::{ClusterQuerySpec, ResourceRecord};

const SPIRE_SERVER_BIN: &str = "/opt/spire/bin/spire-server";

/// One method per query form the dashboard needs. All methods are read-only
/// against the cluster; implementations apply their own uniform timeout.
#[async_trait::async_trait]
pub trait ClusterExec: Send + Sync {
    /// Run a list query and return the parsed item sequence.
    async fn list(&self, spec: &ClusterQuerySpec) -> Result<Vec<ResourceRecord>>;

    /// Run a describe query and return its text output verbatim.
    async fn describe(&self, spec: &ClusterQuerySpec) -> Result<String>;

    /// Names of the kubeconfig contexts visible to the executor.
    async fn contexts(&self) -> Result<Vec<String>>;

    /// Labels of one pod as a JSON object (empty object when unset).
    async fn pod_labels(
        &self,
        context: &str,
        namespace: &str,
        pod: &str,
    ) -> Result<serde_json::Value>;

    /// Service-account name bound to one pod (may be empty when unset).
    async fn service_account(&self, context: &str, namespace: &str, pod: &str) -> Result<String>;

    /// Raw registration entry listing from the SPIRE server pod.
    async fn registration_entries(&self, context: &str) -> Result<String>;
}

/// Production executor: shells out to kubectl under a fixed per-query timeout.
pub struct KubectlExec {
    timeout: Duration,
    server_namespace: String,
    server_pod: String,
}

impl KubectlExec {
    pub fn new(timeout: Duration, server_namespace: &str, server_pod: &str) -> Self {
        Self {
            timeout,
            server_namespace: server_namespace.to_string(),
            server_pod: server_pod.to_string(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>> {
        let rendered = render_command(args);
        debug!(command = %rendered, "kubectl: run");
        let fut = Command::new("kubectl").args(args).output();
        let out = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| anyhow!("timed out after {:?}: {}", self.timeout, rendered))?
            .with_context(|| format!("spawning {}", rendered))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(anyhow!(
                "{} failed ({}): {}",
                rendered,
                out.status,
                stderr.trim()
            ));
        }
        Ok(out.stdout)
    }

    async fn run_text(&self, args: &[String]) -> Result<String> {
        let out = self.run(args).await?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn jsonpath_args(context: &str, namespace: &str, pod: &str, path: &str) -> Vec<String> {
        vec![
            "--context".to_string(),
            context.to_string(),
            "-n".to_string(),
            namespace.to_string(),
            "get".to_string(),
            "pod".to_string(),
            pod.to_string(),
            "-o".to_string(),
            format!("jsonpath={{{}}}", path),
        ]
    }
}

#[async_trait::async_trait]
impl ClusterExec for KubectlExec {
    async fn list(&self, spec: &ClusterQuerySpec) -> Result<Vec<ResourceRecord>> {
        let out = self.run(&spec.argv()).await?;
        parse_list_output(&out)
    }

    async fn describe(&self, spec: &ClusterQuerySpec) -> Result<String> {
        self.run_text(&spec.argv()).await
    }

    async fn contexts(&self) -> Result<Vec<String>> {
        let args = vec![
            "config".to_string(),
            "get-contexts".to_string(),
            "-o".to_string(),
            "name".to_string(),
        ];
        let out = self.run_text(&args).await?;
        Ok(out
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn pod_labels(
        &self,
        context: &str,
        namespace: &str,
        pod: &str,
    ) -> Result<serde_json::Value> {
        let args = Self::jsonpath_args(context, namespace, pod, ".metadata.labels");
        let out = self.run_text(&args).await?;
        let trimmed = out.trim();
        if trimmed.is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(trimmed).context("parsing pod labels jsonpath output")
    }

    async fn service_account(&self, context: &str, namespace: &str, pod: &str) -> Result<String> {
        let args = Self::jsonpath_args(context, namespace, pod, ".spec.serviceAccountName");
        let out = self.run_text(&args).await?;
        Ok(out.trim().to_string())
    }

    async fn registration_entries(&self, context: &str) -> Result<String> {
        let args = vec![
            "--context".to_string(),
            context.to_string(),
            "-n".to_string(),
            self.server_namespace.clone(),
            "exec".to_string(),
            self.server_pod.clone(),
            "--".to_string(),
            SPIRE_SERVER_BIN.to_string(),
            "entry".to_string(),
            "show".to_string(),
        ];
        self.run_text(&args).await
    }
}

/// Parse `kubectl get -o json` output into its item sequence. A response
/// without an `items` array is treated as an empty list; unparseable output
/// is an error for the caller to degrade.
pub fn parse_list_output(raw: &[u8]) -> Result<Vec<ResourceRecord>> {
    let v: serde_json::Value = serde_json::from_slice(raw).context("parsing kubectl list output")?;
    let items = match v.get("items").and_then(|i| i.as_array()) {
        Some(items) => items.iter().cloned().map(ResourceRecord::from).collect(),
        None => Vec::new(),
    };
    Ok(items)
}

fn render_command(args: &[String]) -> String {
    let mut s = String::from("kubectl");
    for a in args {
        s.push(' ');
        s.push_str(a);
    }
    s
}

// ----------------- Scripted implementation for tests -----------------

/// Canned executor: responses keyed by rendered command, every invocation
/// recorded so tests can assert on zero or positional calls. An unscripted
/// query (or an unset field) behaves as an executor failure.
#[derive(Default)]
pub struct ScriptedExec {
    pub contexts: Option<Vec<String>>,
    pub lists: HashMap<String, Vec<ResourceRecord>>,
    pub describes: HashMap<String, String>,
    pub labels: Option<serde_json::Value>,
    pub service_account: Option<String>,
    pub entries: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_list(&mut self, spec: &ClusterQuerySpec, items: Vec<ResourceRecord>) {
        self.lists.insert(spec.command_string(), items);
    }

    pub fn script_describe(&mut self, spec: &ClusterQuerySpec, output: &str) {
        self.describes
            .insert(spec.command_string(), output.to_string());
    }

    /// Every command issued so far, in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, cmd: String) {
        self.calls.lock().expect("calls lock").push(cmd);
    }
}

#[async_trait::async_trait]
impl ClusterExec for ScriptedExec {
    async fn list(&self, spec: &ClusterQuerySpec) -> Result<Vec<ResourceRecord>> {
        let cmd = spec.command_string();
        self.record(cmd.clone());
        self.lists
            .get(&cmd)
            .cloned()
            .ok_or_else(|| anyhow!("scripted failure: {}", cmd))
    }

    async fn describe(&self, spec: &ClusterQuerySpec) -> Result<String> {
        let cmd = spec.command_string();
        self.record(cmd.clone());
        self.describes
            .get(&cmd)
            .cloned()
            .ok_or_else(|| anyhow!("scripted failure: {}", cmd))
    }

    async fn contexts(&self) -> Result<Vec<String>> {
        self.record("kubectl config get-contexts -o name".to_string());
        self.contexts
            .clone()
            .ok_or_else(|| anyhow!("scripted failure: get-contexts"))
    }

    async fn pod_labels(
        &self,
        context: &str,
        namespace: &str,
        pod: &str,
    ) -> Result<serde_json::Value> {
        self.record(format!("labels {}/{}/{}", context, namespace, pod));
        self.labels
            .clone()
            .ok_or_else(|| anyhow!("scripted failure: pod labels"))
    }

    async fn service_account(&self, context: &str, namespace: &str, pod: &str) -> Result<String> {
        self.record(format!("serviceaccount {}/{}/{}", context, namespace, pod));
        self.service_account
            .clone()
            .ok_or_else(|| anyhow!("scripted failure: service account"))
    }

    async fn registration_entries(&self, context: &str) -> Result<String> {
        self.record(format!("entries {}", context));
        self.entries
            .clone()
            .ok_or_else(|| anyhow!("scripted failure: registration entries"))
    }
}
