//! HTTP routes for the hub

pub mod data;
pub mod health;
pub mod metadata;
pub mod sync;

pub use data::handle_data_request;
pub use health::{health_check, version_info};
pub use metadata::handle_metadata_request;
pub use sync::{handle_sync_request, handle_sync_status};

use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use serde_json::json;

use crate::types::ApiError;

/// Render an error as its documented status code with a JSON body
pub fn error_response(err: &ApiError) -> Response<Full<Bytes>> {
    let body = json!({ "error": err.kind(), "message": err.to_string() });

    Response::builder()
        .status(err.status())
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
