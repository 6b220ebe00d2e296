//! GA4GH DRS integration and Range header validation
//!
//! A file's `access_url` is either a `drs://` URI resolved through the
//! host's DRS API, or a bare HTTPS URL streamed directly. DRS objects list
//! access methods; this gateway bridges HTTPS/S3 and nothing else.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::types::{ApiError, Result};

/// A DRS access URL, which upstreams serve either as a plain string or as
/// an object with a `url` member
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AccessUrl {
    Plain(String),
    Object { url: String },
}

impl AccessUrl {
    pub fn as_str(&self) -> &str {
        match self {
            AccessUrl::Plain(url) => url,
            AccessUrl::Object { url } => url,
        }
    }
}

/// GA4GH DRS access method for retrieving object bytes
#[derive(Debug, Clone, Deserialize)]
pub struct DrsAccessMethod {
    /// e.g. "https", "s3", "globus", "gs"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub access_url: Option<AccessUrl>,
    #[serde(default)]
    pub access_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// GA4GH DRS object with metadata and access methods
#[derive(Debug, Clone, Deserialize)]
pub struct DrsObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub access_methods: Vec<DrsAccessMethod>,
}

/// Parse a DRS URI into hostname and object id
pub fn parse_drs_uri(drs_uri: &str) -> Result<(String, String)> {
    let rest = drs_uri
        .strip_prefix("drs://")
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid DRS URI: {}", drs_uri)))?;

    let (host, object_id) = rest
        .split_once('/')
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid DRS URI format: {}", drs_uri)))?;

    if host.is_empty() || object_id.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Invalid DRS URI format: {}",
            drs_uri
        )));
    }

    Ok((host.to_string(), object_id.to_string()))
}

/// Fetch DRS object metadata from the host's GA4GH DRS API
pub async fn fetch_drs_object(
    client: &reqwest::Client,
    drs_uri: &str,
    timeout: Duration,
) -> Result<DrsObject> {
    let (host, object_id) = parse_drs_uri(drs_uri)?;
    let url = format!("https://{}/ga4gh/drs/v1/objects/{}", host, object_id);

    debug!(url = %url, "Fetching DRS metadata");

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(format!("DRS service timeout for {}", object_id))
            } else {
                ApiError::UpstreamError(format!("DRS request failed: {}", e))
            }
        })?;

    match response.status().as_u16() {
        200 => response
            .json::<DrsObject>()
            .await
            .map_err(|e| ApiError::UpstreamError(format!("Invalid DRS response: {}", e))),
        404 => Err(ApiError::NotFound(format!(
            "DRS object not found: {}",
            object_id
        ))),
        401 | 403 => Err(ApiError::Forbidden(
            "DRS object requires authentication".to_string(),
        )),
        status => Err(ApiError::UpstreamError(format!(
            "DRS API error: HTTP {}",
            status
        ))),
    }
}

/// Pick the HTTPS download URL from a DRS object's access methods
///
/// HTTPS/S3 wins over Globus; a Globus-only object cannot be bridged.
pub fn select_https_url(methods: &[DrsAccessMethod]) -> Result<String> {
    for method in methods {
        if matches!(method.kind.as_str(), "https" | "s3") {
            if let Some(ref url) = method.access_url {
                return Ok(url.as_str().to_string());
            }
        }
    }

    if methods.iter().any(|m| m.kind == "globus") {
        return Err(ApiError::Unsupported(
            "file is only available via Globus transfer".to_string(),
        ));
    }

    Err(ApiError::Unsupported(
        "no HTTPS or S3 access method available".to_string(),
    ))
}

/// Syntactic validation of an inbound Range header
///
/// Accepted forms: `bytes=start-end`, `bytes=start-`, `bytes=-suffix`,
/// single range only. The header is forwarded verbatim on success; bounds
/// against the actual size are the upstream's concern.
pub fn validate_range_header(range: &str) -> Result<()> {
    let ranges = range
        .strip_prefix("bytes=")
        .ok_or_else(|| ApiError::BadRequest("Range header must use bytes units".to_string()))?
        .trim();

    if ranges.contains(',') {
        return Err(ApiError::BadRequest(
            "Multipart range requests are not supported".to_string(),
        ));
    }

    let (start, end) = ranges
        .split_once('-')
        .ok_or_else(|| ApiError::BadRequest("Invalid range format: missing '-'".to_string()))?;

    let parse = |part: &str| -> Result<Option<u64>> {
        if part.is_empty() {
            return Ok(None);
        }
        part.parse::<u64>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Invalid range bound: {}", part)))
    };

    match (parse(start)?, parse(end)?) {
        // bytes=-suffix
        (None, Some(suffix)) => {
            if suffix == 0 {
                return Err(ApiError::BadRequest(
                    "Suffix length must be positive".to_string(),
                ));
            }
        }
        // bytes=start-
        (Some(_), None) => {}
        // bytes=start-end
        (Some(s), Some(e)) => {
            if s > e {
                return Err(ApiError::BadRequest(
                    "Range start must be <= end".to_string(),
                ));
            }
        }
        (None, None) => {
            return Err(ApiError::BadRequest("Empty range".to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_drs_uri() {
        let (host, id) = parse_drs_uri("drs://drs.hubmapconsortium.org/abc123").unwrap();
        assert_eq!(host, "drs.hubmapconsortium.org");
        assert_eq!(id, "abc123");
    }

    #[test]
    fn rejects_malformed_drs_uris() {
        assert!(parse_drs_uri("https://example.org/x").is_err());
        assert!(parse_drs_uri("drs://hostonly").is_err());
        assert!(parse_drs_uri("drs:///missing-host").is_err());
    }

    fn method(kind: &str, url: Option<&str>) -> DrsAccessMethod {
        DrsAccessMethod {
            kind: kind.to_string(),
            access_url: url.map(|u| AccessUrl::Plain(u.to_string())),
            access_id: None,
            region: None,
        }
    }

    #[test]
    fn https_access_method_wins() {
        let methods = vec![
            method("globus", Some("globus://endpoint/path")),
            method("https", Some("https://host/data.csv")),
        ];
        assert_eq!(select_https_url(&methods).unwrap(), "https://host/data.csv");
    }

    #[test]
    fn globus_only_is_unsupported() {
        let methods = vec![method("globus", Some("globus://endpoint/path"))];
        assert!(matches!(
            select_https_url(&methods).unwrap_err(),
            ApiError::Unsupported(_)
        ));
    }

    #[test]
    fn no_methods_is_unsupported() {
        assert!(matches!(
            select_https_url(&[]).unwrap_err(),
            ApiError::Unsupported(_)
        ));
    }

    #[test]
    fn object_form_access_url_is_accepted() {
        let json = r#"{"type": "https", "access_url": {"url": "https://host/f"}}"#;
        let parsed: DrsAccessMethod = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_url.unwrap().as_str(), "https://host/f");
    }

    #[test]
    fn valid_ranges_pass() {
        assert!(validate_range_header("bytes=0-1023").is_ok());
        assert!(validate_range_header("bytes=100-").is_ok());
        assert!(validate_range_header("bytes=-500").is_ok());
        assert!(validate_range_header("bytes=0-0").is_ok());
    }

    #[test]
    fn invalid_ranges_are_bad_requests() {
        for header in [
            "bits=0-100",
            "bytes=10-5",
            "bytes=a-b",
            "bytes=0-100,200-300",
            "bytes=-0",
            "bytes=-",
            "0-100",
        ] {
            assert!(
                matches!(
                    validate_range_header(header),
                    Err(ApiError::BadRequest(_))
                ),
                "{} should be rejected",
                header
            );
        }
    }
}
