//! MongoDB client and collection handles
//!
//! One collection per C2M2 entity type plus the single-document `locks`
//! collection. The materializer loads these collections; the query side
//! only reads them, the sync side replaces them per `submission`.

use bson::{doc, Document};
use mongodb::{Client, Collection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::types::{ApiError, Result};

/// Collection names for the flat per-entity layout
pub mod collections {
    pub const FILE: &str = "file";
    pub const DCC: &str = "dcc";
    pub const COLLECTION: &str = "collection";
    pub const BIOSAMPLE: &str = "biosample";
    pub const FILE_FORMAT: &str = "file_format";
    pub const DATA_TYPE: &str = "data_type";
    pub const ASSAY_TYPE: &str = "assay_type";
    pub const ANATOMY: &str = "anatomy";
    pub const FILE_IN_COLLECTION: &str = "file_in_collection";
    pub const BIOSAMPLE_IN_COLLECTION: &str = "biosample_in_collection";
    pub const LOCKS: &str = "locks";

    /// Entity collections replaced wholesale during a sync
    pub const SYNCED: &[&str] = &[
        FILE,
        DCC,
        COLLECTION,
        BIOSAMPLE,
        FILE_FORMAT,
        DATA_TYPE,
        ASSAY_TYPE,
        ANATOMY,
        FILE_IN_COLLECTION,
        BIOSAMPLE_IN_COLLECTION,
    ];
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| ApiError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        // Verify connection with timeout
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| ApiError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection handle
    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        self.client.database(&self.db_name).collection::<T>(name)
    }

    /// Get an untyped Document collection handle
    pub fn documents(&self, name: &str) -> Collection<Document> {
        self.collection::<Document>(name)
    }

    /// Get the raw MongoDB client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

#[cfg(test)]
mod tests {
    // Connection and round-trip behavior needs a running MongoDB instance;
    // covered by the deployment smoke tests rather than unit tests here.
}
