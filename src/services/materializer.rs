//! Materializer collaborator interface
//!
//! The materializer is the external component that parses and normalizes a
//! DCC's raw datapackage into the flat per-entity tables of the store
//! layout. The hub consumes its output through the `Materializer` trait;
//! the production implementation fetches a JSON datapackage over HTTPS.

use async_trait::async_trait;
use bson::Document;
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::collections;
use crate::dcc_registry::DccConfig;
use crate::types::{ApiError, Result};

/// One flat entity table of a normalized datapackage
#[derive(Debug, Clone)]
pub struct EntityTable {
    pub name: String,
    pub rows: Vec<Document>,
}

/// A DCC's normalized datapackage: the flat entity tables to load
#[derive(Debug, Clone, Default)]
pub struct Datapackage {
    pub tables: Vec<EntityTable>,
}

impl Datapackage {
    pub fn record_count(&self) -> u64 {
        self.tables.iter().map(|t| t.rows.len() as u64).sum()
    }
}

/// Produces normalized datapackages, one call per DCC
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn fetch_datapackage(&self, dcc: &DccConfig) -> Result<Datapackage>;
}

/// Fetches JSON datapackages from the materializer service
///
/// The overall fetch deadline is the orchestrator's concern; the shared
/// client carries the connect timeout.
pub struct HttpMaterializer {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpMaterializer {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    fn url_for(&self, dcc: &DccConfig) -> String {
        match self.base_url {
            Some(ref base) => format!("{}/datapackage/{}", base.trim_end_matches('/'), dcc.name),
            None => dcc.datapackage_url.to_string(),
        }
    }
}

#[async_trait]
impl Materializer for HttpMaterializer {
    async fn fetch_datapackage(&self, dcc: &DccConfig) -> Result<Datapackage> {
        let url = self.url_for(dcc);
        debug!(dcc = %dcc.name, url = %url, "Fetching normalized datapackage");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ApiError::Timeout(format!("datapackage fetch for {}: {}", dcc.name, e))
                } else {
                    ApiError::UpstreamError(format!("datapackage fetch for {}: {}", dcc.name, e))
                }
            })?;

        if !response.status().is_success() {
            return Err(ApiError::UpstreamError(format!(
                "datapackage fetch for {} returned HTTP {}",
                dcc.name,
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            ApiError::UpstreamError(format!("invalid datapackage for {}: {}", dcc.name, e))
        })?;

        tables_from_json(&body)
    }
}

/// Convert a `{table: [row, ...]}` JSON document into entity tables
///
/// Tables outside the synced layout are dropped; a malformed row fails the
/// whole datapackage rather than loading a partial table.
pub fn tables_from_json(body: &Value) -> Result<Datapackage> {
    let entries = body.as_object().ok_or_else(|| {
        ApiError::UpstreamError("datapackage must be a JSON object of tables".to_string())
    })?;

    let mut tables = Vec::new();
    for (name, rows_value) in entries {
        if !collections::SYNCED.contains(&name.as_str()) {
            warn!(table = %name, "Skipping unrecognized datapackage table");
            continue;
        }
        let rows_json = rows_value.as_array().ok_or_else(|| {
            ApiError::UpstreamError(format!("table '{}' must be an array of rows", name))
        })?;

        let mut rows = Vec::with_capacity(rows_json.len());
        for row in rows_json {
            let doc = match row {
                Value::Object(_) => bson::to_document(row).map_err(|e| {
                    ApiError::UpstreamError(format!("table '{}' row conversion: {}", name, e))
                })?,
                _ => {
                    return Err(ApiError::UpstreamError(format!(
                        "table '{}' contains a non-object row",
                        name
                    )))
                }
            };
            rows.push(doc);
        }
        tables.push(EntityTable {
            name: name.clone(),
            rows,
        });
    }

    Ok(Datapackage { tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_known_tables() {
        let body = json!({
            "file": [{ "id_namespace": "ns", "local_id": "f-1" }],
            "dcc": [{ "id": "cfde_registry_dcc:4dn" }],
        });
        let pkg = tables_from_json(&body).unwrap();
        assert_eq!(pkg.tables.len(), 2);
        assert_eq!(pkg.record_count(), 2);
    }

    #[test]
    fn drops_unrecognized_tables() {
        let body = json!({
            "file": [],
            "exotic_table": [{ "x": 1 }],
        });
        let pkg = tables_from_json(&body).unwrap();
        assert_eq!(pkg.tables.len(), 1);
        assert_eq!(pkg.tables[0].name, "file");
    }

    #[test]
    fn malformed_rows_fail_the_package() {
        let body = json!({ "file": [42] });
        assert!(matches!(
            tables_from_json(&body).unwrap_err(),
            ApiError::UpstreamError(_)
        ));
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert!(tables_from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn registry_url_used_without_base_override() {
        let m = HttpMaterializer::new(reqwest::Client::new(), None);
        let dcc = crate::dcc_registry::get_dcc_config("4dn").unwrap();
        assert_eq!(m.url_for(dcc), dcc.datapackage_url);

        let m = HttpMaterializer::new(
            reqwest::Client::new(),
            Some("http://materializer:9000/".to_string()),
        );
        assert_eq!(m.url_for(dcc), "http://materializer:9000/datapackage/4dn");
    }
}
