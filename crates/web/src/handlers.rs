#![forbid(unsafe_code)]

use std::convert::Infallible;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, warn};
use warp::http::StatusCode;
use warp::{reply, Rejection, Reply};

use spirescope_core::{DescribeRequest, SpirescopeError};

use crate::routes::AppState;

pub async fn pod_data(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    metrics::counter!("snapshot_requests_total", 1u64);
    match spirescope_aggregate::snapshot(state.exec.as_ref(), &state.layout).await {
        Ok(snap) => Ok(reply::with_status(reply::json(&snap), StatusCode::OK)),
        Err(e) => {
            error!(error = %e, "pod-data: snapshot failed");
            let body = json!({
                "error": "Failed to fetch pod data",
                "deploymentType": "unknown",
                "clusters": {},
            });
            Ok(reply::with_status(
                reply::json(&body),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

pub async fn describe(
    tail: warp::path::Tail,
    state: Arc<AppState>,
) -> Result<impl Reply, Infallible> {
    let segments: Vec<&str> = tail.as_str().split('/').filter(|s| !s.is_empty()).collect();
    let req = match DescribeRequest::from_segments(&segments) {
        Ok(req) => req,
        Err(_) => return Ok(invalid_parameters()),
    };
    match state.inspector.describe(&req).await {
        Ok(resp) => Ok(reply::with_status(reply::json(&resp), StatusCode::OK)),
        Err(SpirescopeError::Validation(_)) => Ok(invalid_parameters()),
        Err(SpirescopeError::DescribeFailed { command, details }) => {
            let body = json!({
                "error": "Failed to describe resource",
                "details": details,
                "command": command,
            });
            Ok(reply::with_status(
                reply::json(&body),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
        Err(e) => {
            error!(error = %e, "describe: internal error");
            let body = json!({"error": "Internal server error"});
            Ok(reply::with_status(
                reply::json(&body),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

pub async fn dashboard(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    match tokio::fs::read_to_string(&state.dashboard_path).await {
        Ok(body) => Ok(reply::with_status(reply::html(body), StatusCode::OK)),
        Err(e) => {
            warn!(path = %state.dashboard_path.display(), error = %e, "dashboard asset missing");
            Ok(reply::with_status(
                reply::html("Dashboard not found".to_string()),
                StatusCode::NOT_FOUND,
            ))
        }
    }
}

pub async fn docs_redirect(state: Arc<AppState>) -> Result<impl Reply, Infallible> {
    Ok(warp::redirect::found(state.docs_uri.clone()))
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    if err.is_not_found() || err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(reply::with_status(
            "Not found".to_string(),
            StatusCode::NOT_FOUND,
        ));
    }
    if err.find::<warp::filters::cors::CorsForbidden>().is_some() {
        return Ok(reply::with_status(
            "CORS request forbidden".to_string(),
            StatusCode::FORBIDDEN,
        ));
    }
    warn!(rejection = ?err, "unhandled rejection");
    Ok(reply::with_status(
        "Internal server error".to_string(),
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
}

fn invalid_parameters() -> reply::WithStatus<reply::Json> {
    reply::with_status(
        reply::json(&json!({"error": "Invalid resource parameters"})),
        StatusCode::BAD_REQUEST,
    )
}
