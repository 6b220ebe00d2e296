//! HTTP server implementation
//!
//! hyper http1 with TokioIo; routing is a match over `(Method, path)`.
//! Each accepted connection runs in its own tokio task, so query handling,
//! streaming downloads, and sync requests all proceed concurrently with no
//! shared state beyond the store itself.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Args;
use crate::db::MongoClient;
use crate::routes;
use crate::services::SyncService;
use crate::types::ApiError;

// Unsync because streamed upstream bodies are Send but not Sync
pub type BoxBody = http_body_util::combinators::UnsyncBoxBody<Bytes, std::io::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    pub sync: Arc<SyncService>,
    /// Shared upstream client for DRS resolution and byte streaming
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        args: Args,
        mongo: MongoClient,
        sync: Arc<SyncService>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            args,
            mongo,
            sync,
            http,
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), ApiError> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| ApiError::ConfigurationError(format!("bind {}: {}", state.args.listen, e)))?;

    info!(
        "c2m2-hub listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // GraphQL-shaped query surface
        (Method::POST, "/metadata") => {
            to_boxed(routes::handle_metadata_request(req, Arc::clone(&state)).await)
        }

        // File streaming with Range support
        (Method::GET, p) if p.starts_with("/data/") => {
            let rest = p.strip_prefix("/data/").unwrap_or("");
            match rest.split_once('/') {
                Some((dcc, local_id)) if !dcc.is_empty() && !local_id.is_empty() => {
                    let dcc = dcc.to_string();
                    let local_id = local_id.to_string();
                    routes::handle_data_request(req, Arc::clone(&state), &dcc, &local_id).await
                }
                _ => to_boxed(bad_request_response("Expected /data/{dcc}/{local_id}")),
            }
        }

        // Lock-gated sync batches
        (Method::POST, "/sync") => {
            to_boxed(routes::handle_sync_request(req, Arc::clone(&state)).await)
        }
        (Method::GET, "/sync/status") => {
            to_boxed(routes::handle_sync_status(Arc::clone(&state)).await)
        }

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        // Not found
        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Bad request response
fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message,
    });

    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
