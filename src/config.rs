//! Configuration for the hub
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// C2M2 Hub - queryable file-metadata service with per-DCC streaming and sync
#[derive(Parser, Debug, Clone)]
#[command(name = "c2m2-hub")]
#[command(about = "C2M2 file-metadata hub over MongoDB")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "DATABASE_URL", default_value = "mongodb://localhost:27017")]
    pub database_url: String,

    /// MongoDB database name
    #[arg(long, env = "DATABASE_NAME", default_value = "cfdb")]
    pub database_name: String,

    /// Shared secret required in the X-API-Key header of sync requests
    /// Sync requests fail with 500 when unset
    #[arg(long, env = "SYNC_API_KEY")]
    pub sync_api_key: Option<String>,

    /// Base URL of the materializer service producing normalized datapackages
    /// Per-DCC registry URLs are used when unset
    #[arg(long, env = "MATERIALIZER_URL")]
    pub materializer_url: Option<String>,

    /// Deadline for fetching one DCC's datapackage, in seconds
    #[arg(long, env = "DATAPACKAGE_TIMEOUT_SECS", default_value = "600")]
    pub datapackage_timeout_secs: u64,

    /// Deadline for DRS metadata resolution, in seconds
    #[arg(long, env = "DRS_TIMEOUT_SECS", default_value = "10")]
    pub drs_timeout_secs: u64,

    /// Deadline for the upstream host to start responding, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value = "30")]
    pub upstream_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.datapackage_timeout_secs == 0 {
            return Err("DATAPACKAGE_TIMEOUT_SECS must be positive".to_string());
        }
        if self.drs_timeout_secs == 0 {
            return Err("DRS_TIMEOUT_SECS must be positive".to_string());
        }
        if self.upstream_timeout_secs == 0 {
            return Err("UPSTREAM_TIMEOUT_SECS must be positive".to_string());
        }
        if let Some(ref key) = self.sync_api_key {
            if key.trim().is_empty() {
                return Err("SYNC_API_KEY must not be blank when set".to_string());
            }
        }
        Ok(())
    }

    /// Sync credential, treating a blank value as unset
    pub fn sync_api_key(&self) -> Option<&str> {
        self.sync_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}
