//! File streaming gateway
//!
//! `GET /data/{dcc}/{local_id}` proxies file bytes from the DCC's upstream
//! hosting. Request lifecycle: Resolve -> Authorize -> Dispatch -> Stream.
//!
//! - Resolve: registry-validated DCC (case-insensitive), then the file row
//!   by `(id_namespace, local_id)`
//! - Authorize: restricted-access markers fail with 403
//! - Dispatch: `drs://` access URLs resolve through the GA4GH DRS API,
//!   `https://` URLs stream directly; Globus-only files are 501
//! - Stream: a syntactically valid `Range` header is forwarded verbatim;
//!   upstream 200/206 pass through with their headers, the body is
//!   relayed chunk-by-chunk without buffering the file
//!
//! Dropping the response mid-stream drops the upstream connection with it;
//! partial-content requests are never retried here, because a retry could
//! splice bytes from a changed object.

use bson::{doc, Document};
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{header, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::collections;
use crate::dcc_registry::get_dcc_config;
use crate::routes::error_response;
use crate::server::{AppState, BoxBody};
use crate::services::drs;
use crate::types::{ApiError, Result};

/// Handle GET /data/{dcc}/{local_id}
pub async fn handle_data_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    dcc: &str,
    local_id: &str,
) -> Response<BoxBody> {
    let range = match req.headers().get(header::RANGE) {
        Some(value) => match value.to_str() {
            Ok(s) => Some(s.to_string()),
            Err(_) => {
                return boxed(error_response(&ApiError::BadRequest(
                    "Range header is not valid UTF-8".to_string(),
                )))
            }
        },
        None => None,
    };

    match stream_file(&state, dcc, local_id, range.as_deref()).await {
        Ok(response) => response,
        Err(e) => {
            warn!(dcc = %dcc, local_id = %local_id, kind = e.kind(), "Download failed: {}", e);
            boxed(error_response(&e))
        }
    }
}

async fn stream_file(
    state: &AppState,
    dcc: &str,
    local_id: &str,
    range: Option<&str>,
) -> Result<Response<BoxBody>> {
    // Resolve: registry first, then the store's DCC row for the namespace
    let dcc_config = get_dcc_config(dcc)?;

    let dcc_doc = state
        .mongo
        .documents(collections::DCC)
        .find_one(doc! {
            "dcc_abbreviation": { "$regex": format!("^{}$", dcc_config.name), "$options": "i" },
        })
        .await?
        .ok_or_else(|| {
            ApiError::ConfigurationError(format!("DCC configuration not found: {}", dcc))
        })?;

    let id_namespace = dcc_doc
        .get_str("project_id_namespace")
        .map_err(|_| {
            ApiError::ConfigurationError(format!("DCC configuration incomplete: {}", dcc))
        })?
        .to_string();

    let file_doc = state
        .mongo
        .documents(collections::FILE)
        .find_one(doc! { "id_namespace": &id_namespace, "local_id": local_id })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {}/{}", dcc, local_id)))?;

    debug!(id_namespace = %id_namespace, local_id = %local_id, "Resolved file");

    // Authorize: no grant scheme is bridged, so any marker is terminal
    if let Some(marker) = restricted_access_marker(&file_doc) {
        info!(dcc = %dcc, local_id = %local_id, marker = %marker, "Blocked restricted file");
        return Err(ApiError::Forbidden(format!(
            "this file requires {} and is not available through this API",
            marker
        )));
    }

    // An invalid Range fails the whole request before the upstream is touched
    if let Some(r) = range {
        drs::validate_range_header(r)?;
    }

    // Dispatch: pick the download URL from the access URL's shape
    let access_url = match file_doc.get_str("access_url") {
        Ok(url) if !url.is_empty() => url.to_string(),
        _ => return Err(ApiError::Unsupported("file has no access URL".to_string())),
    };

    let mut filename = file_doc.get_str("filename").unwrap_or("file").to_string();
    let mut content_type: Option<String> = file_doc.get_str("mime_type").ok().map(String::from);

    let download_url = if access_url.starts_with("drs://") {
        let object = drs::fetch_drs_object(
            &state.http,
            &access_url,
            Duration::from_secs(state.args.drs_timeout_secs),
        )
        .await?;
        if let Some(name) = object.name.clone().filter(|n| !n.is_empty()) {
            filename = name;
        }
        if let Some(mime) = object.mime_type.clone().filter(|m| !m.is_empty()) {
            content_type = Some(mime);
        }
        drs::select_https_url(&object.access_methods)?
    } else if access_url.starts_with("https://") {
        access_url
    } else {
        return Err(ApiError::BadRequest(format!(
            "Invalid file access URL: {}",
            access_url
        )));
    };

    // Stream: forward the validated Range verbatim, pass 200/206 through
    let mut builder = state.http.get(&download_url);
    if let Some(r) = range {
        builder = builder.header(header::RANGE, r);
    }

    let deadline = Duration::from_secs(state.args.upstream_timeout_secs);
    let upstream = match tokio::time::timeout(deadline, builder.send()).await {
        Err(_) => {
            return Err(ApiError::Timeout(format!(
                "upstream did not respond within {}s",
                deadline.as_secs()
            )))
        }
        Ok(Err(e)) if e.is_timeout() => {
            return Err(ApiError::Timeout(format!("upstream timed out: {}", e)))
        }
        Ok(Err(e)) => {
            return Err(ApiError::UpstreamError(format!(
                "upstream request failed: {}",
                e
            )))
        }
        Ok(Ok(response)) => response,
    };

    let status = upstream.status().as_u16();
    if status != 200 && status != 206 {
        return Err(ApiError::UpstreamError(format!(
            "upstream returned HTTP {}",
            status
        )));
    }

    info!(
        dcc = %dcc,
        local_id = %local_id,
        status = status,
        ranged = range.is_some(),
        "Streaming file"
    );

    let mut response = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename.replace('"', "")),
        );

    for name in [header::CONTENT_LENGTH, header::CONTENT_RANGE, header::CONTENT_TYPE] {
        if let Some(value) = upstream.headers().get(&name) {
            response = response.header(name, value.clone());
        }
    }
    if !upstream.headers().contains_key(header::CONTENT_TYPE) {
        response = response.header(
            header::CONTENT_TYPE,
            content_type.as_deref().unwrap_or("application/octet-stream"),
        );
    }

    let stream = upstream
        .bytes_stream()
        .map_ok(Frame::data)
        .map_err(std::io::Error::other);

    response
        .body(BodyExt::boxed_unsync(StreamBody::new(stream)))
        .map_err(|e| ApiError::Database(format!("response build failed: {}", e)))
}

/// Restricted-access classification from the file's stored fields
///
/// Policy: a dbGaP study id or a cached consortium/protected access level
/// marks the file as access-controlled.
pub(crate) fn restricted_access_marker(file: &Document) -> Option<String> {
    if let Ok(study) = file.get_str("dbgap_study_id") {
        if !study.is_empty() {
            return Some(format!("dbGaP-controlled access (study {})", study));
        }
    }
    if let Ok(level) = file.get_str("data_access_level") {
        if level == "consortium" || level == "protected" {
            return Some(format!("{} access", level));
        }
    }
    None
}

fn boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}
