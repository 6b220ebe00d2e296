//! Metadata query endpoint
//!
//! `POST /metadata` carries one GraphQL-shaped operation as a JSON
//! document:
//!
//! ```text
//! {"files": {"input": [...], "page": 0, "pageSize": 100, "select": [...]}}
//! {"file": {"id": "65ab..."}}
//! ```
//!
//! Responses keep the GraphQL envelope: `{"data": {...}}` on success,
//! `{"errors": [{"kind", "message"}]}` with the documented status code on
//! failure. Compilation errors are detected before any store round-trip.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::query::{self, FilesQuery};
use crate::server::AppState;
use crate::types::{ApiError, Result};

/// Arguments of the `files` operation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilesArgs {
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub select: Option<Vec<String>>,
}

fn default_page_size() -> i64 {
    100
}

/// Arguments of the `file` operation
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileArgs {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetadataRequest {
    #[serde(default)]
    files: Option<FilesArgs>,
    #[serde(default)]
    file: Option<FileArgs>,
}

/// One parsed query operation
#[derive(Debug, Clone)]
pub enum Operation {
    Files(FilesArgs),
    File(FileArgs),
}

/// Parse a request body into exactly one operation
pub fn parse_operation(body: &[u8]) -> Result<Operation> {
    let request: MetadataRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid query document: {}", e)))?;

    match (request.files, request.file) {
        (Some(files), None) => Ok(Operation::Files(files)),
        (None, Some(file)) => Ok(Operation::File(file)),
        (Some(_), Some(_)) => Err(ApiError::BadRequest(
            "Query document must carry exactly one operation, got both 'files' and 'file'"
                .to_string(),
        )),
        (None, None) => Err(ApiError::BadRequest(
            "Query document must carry a 'files' or 'file' operation".to_string(),
        )),
    }
}

/// Handle POST /metadata
pub async fn handle_metadata_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("Metadata request body error: {}", e);
            return errors_response(&ApiError::BadRequest(
                "Failed to read request body".to_string(),
            ));
        }
    };

    match execute(&state, &body).await {
        Ok(data) => json_response(StatusCode::OK, &json!({ "data": data })),
        Err(e) => {
            debug!(kind = e.kind(), "Metadata query failed: {}", e);
            errors_response(&e)
        }
    }
}

async fn execute(state: &AppState, body: &[u8]) -> Result<Value> {
    match parse_operation(body)? {
        Operation::Files(args) => {
            let query = FilesQuery {
                input: args.input,
                page: args.page,
                page_size: args.page_size,
                select: args.select,
            };
            let records = query::files(&state.mongo, &query).await?;
            Ok(json!({ "files": records }))
        }
        Operation::File(args) => {
            let record = query::file_by_id(&state.mongo, &args.id).await?;
            Ok(json!({ "file": record }))
        }
    }
}

fn json_response(status: StatusCode, body: &Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn errors_response(err: &ApiError) -> Response<Full<Bytes>> {
    json_response(
        err.status(),
        &json!({ "errors": [{ "kind": err.kind(), "message": err.to_string() }] }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_files_operation_with_defaults() {
        let op = parse_operation(br#"{"files": {}}"#).unwrap();
        match op {
            Operation::Files(args) => {
                assert_eq!(args.page, 0);
                assert_eq!(args.page_size, 100);
                assert!(args.input.is_none());
                assert!(args.select.is_none());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parses_files_operation_arguments() {
        let op = parse_operation(
            br#"{"files": {"input": [{"filename": "x"}], "page": 2, "pageSize": 25,
                 "select": ["dcc", "collections.biosamples"]}}"#,
        )
        .unwrap();
        match op {
            Operation::Files(args) => {
                assert_eq!(args.page, 2);
                assert_eq!(args.page_size, 25);
                assert_eq!(args.select.unwrap().len(), 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn parses_file_operation() {
        let op = parse_operation(br#"{"file": {"id": "65ab0000000000000000aa00"}}"#).unwrap();
        match op {
            Operation::File(args) => assert_eq!(args.id, "65ab0000000000000000aa00"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_or_two_operations() {
        assert!(matches!(
            parse_operation(br#"{}"#).unwrap_err(),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            parse_operation(br#"{"files": {}, "file": {"id": "x"}}"#).unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }

    #[test]
    fn rejects_unknown_operation_names() {
        assert!(parse_operation(br#"{"filez": {}}"#).is_err());
        assert!(parse_operation(br#"not json"#).is_err());
    }
}
