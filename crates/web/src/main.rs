//! Spirescope dashboard server: aggregates SPIRE deployment state from one or
//! two clusters and serves it to the browser dashboard.

#![forbid(unsafe_code)]

mod handlers;
mod routes;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use spirescope_core::Layout;
use spirescope_kubectl::KubectlExec;

#[derive(Parser, Debug)]
#[command(name = "spirescope", version, about = "SPIRE cluster dashboard server")]
struct Cli {
    /// Listening port
    #[arg(long, env = "SPIRESCOPE_PORT", default_value_t = 3000)]
    port: u16,

    /// Per-query kubectl timeout, in seconds
    #[arg(long = "query-timeout-secs", env = "SPIRESCOPE_QUERY_TIMEOUT_SECS", default_value_t = 10)]
    query_timeout_secs: u64,

    /// Directory holding the static dashboard assets
    #[arg(long = "asset-dir", env = "SPIRESCOPE_ASSET_DIR", default_value = "assets")]
    asset_dir: std::path::PathBuf,

    /// Documentation site that /docs redirects to
    #[arg(long = "docs-url", env = "SPIRESCOPE_DOCS_URL", default_value = "http://localhost:8000/")]
    docs_url: String,

    /// SPIRE server pod the registration entry listing is read from
    #[arg(long = "server-pod", env = "SPIRESCOPE_SERVER_POD", default_value = "spire-server-0")]
    server_pod: String,
}

fn init_tracing() {
    let env = std::env::var("SPIRESCOPE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SPIRESCOPE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SPIRESCOPE_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let layout = Layout::default();
    let exec = Arc::new(KubectlExec::new(
        Duration::from_secs(cli.query_timeout_secs),
        &layout.server_namespace,
        &cli.server_pod,
    ));
    let state = Arc::new(routes::AppState::new(
        exec,
        layout,
        cli.asset_dir.clone(),
        &cli.docs_url,
    )?);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cli.port).into();
    info!(%addr, "dashboard server listening");
    info!(
        dashboard = %format!("http://localhost:{}/web-dashboard.html", cli.port),
        api = %format!("http://localhost:{}/api/pod-data", cli.port),
        "spirescope ready"
    );

    let (_bound, server) =
        warp::serve(routes::routes(state)).bind_with_graceful_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        });
    server.await;
    info!("server shutdown complete");
    Ok(())
}
