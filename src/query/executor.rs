//! Query execution against the store
//!
//! The compiler and planner are pure; this module runs their pipelines on
//! the `file` collection and shapes the output. Errors surface before any
//! partial result is produced.

use bson::{oid::ObjectId, Document};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::db::{collections, MongoClient};
use crate::query::filter::{compile, FilterExpr};
use crate::query::pipeline::{plan_file_by_id, plan_files, resolve_selection, validate_pagination};
use crate::query::shape::shape_file;
use crate::types::{ApiError, Result};

/// Arguments of the `files` operation
#[derive(Debug, Clone, Default)]
pub struct FilesQuery {
    pub input: Option<Value>,
    pub page: i64,
    pub page_size: i64,
    pub select: Option<Vec<String>>,
}

/// Run the paginated `files` query
pub async fn files(mongo: &MongoClient, query: &FilesQuery) -> Result<Vec<Value>> {
    let filter = query.input.as_ref().map(FilterExpr::from_json);
    let compiled = compile(filter.as_ref())?;
    let selection = resolve_selection(query.select.as_deref())?;
    let page = validate_pagination(query.page, query.page_size)?;

    let stages = plan_files(&compiled, &selection, page);
    debug!(stages = stages.len(), skip = page.skip, limit = page.limit, "Running files query");

    let docs = run_pipeline(mongo, stages).await?;
    Ok(docs.iter().map(shape_file).collect())
}

/// Run the single-entity `file` lookup by opaque store identifier
pub async fn file_by_id(mongo: &MongoClient, id: &str) -> Result<Value> {
    // An unparseable identifier cannot name any record
    let object_id = ObjectId::parse_str(id)
        .map_err(|_| ApiError::NotFound(format!("file {}", id)))?;

    let selection: BTreeSet<String> = resolve_selection(None)?;
    let stages = plan_file_by_id(object_id, &selection);

    let docs = run_pipeline(mongo, stages).await?;
    docs.first()
        .map(shape_file)
        .ok_or_else(|| ApiError::NotFound(format!("file {}", id)))
}

async fn run_pipeline(mongo: &MongoClient, stages: Vec<Document>) -> Result<Vec<Document>> {
    let mut cursor = mongo
        .documents(collections::FILE)
        .aggregate(stages)
        .await
        .map_err(|e| ApiError::Database(format!("Aggregation failed: {}", e)))?;

    let mut docs = Vec::new();
    while let Some(doc) = cursor.next().await {
        docs.push(doc.map_err(|e| ApiError::Database(format!("Cursor error: {}", e)))?);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_query_defaults() {
        let q = FilesQuery { page_size: 100, ..Default::default() };
        assert_eq!(q.page, 0);
        assert!(q.input.is_none());
        assert!(q.select.is_none());
    }

    // Pipeline execution needs a running MongoDB instance; planning and
    // shaping are covered by the pure-module tests.
}
