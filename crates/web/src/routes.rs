#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use warp::http::Uri;
use warp::Filter;

use spirescope_core::Layout;
use spirescope_inspect::Inspector;
use spirescope_kubectl::ClusterExec;

use crate::handlers;

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub exec: Arc<dyn ClusterExec>,
    pub layout: Layout,
    pub inspector: Inspector,
    pub dashboard_path: PathBuf,
    pub docs_uri: Uri,
}

impl AppState {
    pub fn new(
        exec: Arc<dyn ClusterExec>,
        layout: Layout,
        asset_dir: PathBuf,
        docs_url: &str,
    ) -> Result<Self> {
        let inspector = Inspector::new(exec.clone(), layout.clone());
        let docs_uri: Uri = docs_url
            .parse()
            .with_context(|| format!("parsing docs url: {}", docs_url))?;
        Ok(Self {
            exec,
            layout,
            inspector,
            dashboard_path: asset_dir.join("web-dashboard.html"),
            docs_uri,
        })
    }
}

/// The full route tree: JSON API, static dashboard, redirects, CORS and a
/// plain-text 404 fallback.
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
    let pod_data = warp::get()
        .and(warp::path!("api" / "pod-data"))
        .and(with_state(state.clone()))
        .and_then(handlers::pod_data);

    // The describe path is consumed as a tail so a wrong segment count yields
    // the documented 400 instead of a routing 404.
    let describe = warp::get()
        .and(warp::path("api"))
        .and(warp::path("describe"))
        .and(warp::path::tail())
        .and(with_state(state.clone()))
        .and_then(handlers::describe);

    let dashboard = warp::get()
        .and(warp::path("web-dashboard.html"))
        .and(warp::path::end())
        .and(with_state(state.clone()))
        .and_then(handlers::dashboard);

    let docs = warp::get()
        .and(warp::path("docs"))
        .and(warp::path::end())
        .and(with_state(state))
        .and_then(handlers::docs_redirect);

    let root = warp::get()
        .and(warp::path::end())
        .map(|| warp::redirect::found(Uri::from_static("/web-dashboard.html")));

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_header("content-type");

    pod_data
        .or(describe)
        .or(dashboard)
        .or(docs)
        .or(root)
        .with(cors)
        .with(warp::trace::request())
        .recover(handlers::handle_rejection)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}
