//! Sync endpoints
//!
//! `POST /sync?dccs=<name>*` starts a lock-gated sync batch; the secret in
//! `X-API-Key` must match the configured value. `GET /sync/status` reports
//! the lock document and recent batch outcomes.
//!
//! Status codes: 202 accepted, 400 unknown DCC, 401 bad credential,
//! 409 already running, 500 missing server configuration.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::dcc_registry::{get_dcc_config, normalize_dcc_name};
use crate::routes::error_response;
use crate::server::AppState;
use crate::types::{ApiError, Result};

/// 202 response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub task_id: String,
    pub status: crate::services::TaskStatus,
    pub dcc_names: Vec<String>,
    pub message: String,
}

/// Parse the repeatable `dccs` query parameter into normalized DCC names
///
/// Accepts `?dccs=4dn&dccs=hubmap` and comma-separated values; every name
/// must exist in the registry.
pub fn parse_dccs_param(query: Option<&str>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let Some(query) = query else {
        return Ok(names);
    };

    for pair in query.split('&') {
        let Some(("dccs", value)) = pair.split_once('=') else {
            continue;
        };
        for raw in value.split(',') {
            if raw.is_empty() {
                continue;
            }
            let normalized = normalize_dcc_name(raw);
            get_dcc_config(&normalized)?;
            if !names.contains(&normalized) {
                names.push(normalized);
            }
        }
    }
    Ok(names)
}

/// Handle POST /sync
pub async fn handle_sync_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    match start_sync(&req, &state).await {
        Ok(body) => Response::builder()
            .status(StatusCode::ACCEPTED)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(
                serde_json::to_string(&body).unwrap_or_default(),
            )))
            .unwrap(),
        Err(e) => error_response(&e),
    }
}

async fn start_sync(req: &Request<Incoming>, state: &AppState) -> Result<SyncResponse> {
    // Server-side configuration fault beats everything, including the lock
    let expected = state.args.sync_api_key().ok_or_else(|| {
        ApiError::ConfigurationError("SYNC_API_KEY not configured on server".to_string())
    })?;

    let presented = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if presented != expected {
        return Err(ApiError::Unauthorized);
    }

    let dcc_names = parse_dccs_param(req.uri().query())?;

    let task = state.sync.start(dcc_names).await?;
    info!(task_id = %task.id, dccs = ?task.dcc_names, "Started sync task");

    Ok(SyncResponse {
        message: format!("Sync started for {}", task.dcc_names.join(", ")),
        task_id: task.id,
        status: task.status,
        dcc_names: task.dcc_names,
    })
}

/// Handle GET /sync/status
pub async fn handle_sync_status(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let lock = match state.sync.lock_state().await {
        Ok(lock) => lock
            .map(|doc| bson::Bson::Document(doc).into_relaxed_extjson())
            .unwrap_or(serde_json::Value::Null),
        Err(e) => return error_response(&e),
    };

    let tasks = state.sync.recent_tasks().await;
    let body = json!({ "lock": lock, "tasks": tasks });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_selects_all_dccs_downstream() {
        assert!(parse_dccs_param(None).unwrap().is_empty());
        assert!(parse_dccs_param(Some("")).unwrap().is_empty());
    }

    #[test]
    fn repeated_and_comma_separated_params_combine() {
        let names = parse_dccs_param(Some("dccs=4dn&dccs=hubmap")).unwrap();
        assert_eq!(names, vec!["4dn", "hubmap"]);

        let names = parse_dccs_param(Some("dccs=4DN,HuBMAP")).unwrap();
        assert_eq!(names, vec!["4dn", "hubmap"]);
    }

    #[test]
    fn duplicate_names_collapse() {
        let names = parse_dccs_param(Some("dccs=4dn&dccs=4DN")).unwrap();
        assert_eq!(names, vec!["4dn"]);
    }

    #[test]
    fn unknown_dcc_is_rejected() {
        assert!(matches!(
            parse_dccs_param(Some("dccs=kf")).unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }

    #[test]
    fn unrelated_params_are_ignored() {
        assert!(parse_dccs_param(Some("other=1")).unwrap().is_empty());
    }
}
