//! C2M2 Hub - queryable biomedical file-metadata service
//!
//! Serves normalized C2M2 file metadata from MongoDB through a single
//! GraphQL-shaped query endpoint, proxies file bytes from heterogeneous
//! per-DCC upstream hosting, and keeps the store in sync with upstream
//! Data Coordinating Centers.
//!
//! ## Subsystems
//!
//! - **Query**: filter compiler + join engine producing aggregation
//!   pipelines over the flat per-entity collections
//! - **Streaming**: byte-range proxy with DRS resolution per DCC
//! - **Sync**: lock-gated, concurrently fanned-out per-DCC ingestion

pub mod catalog;
pub mod config;
pub mod db;
pub mod dcc_registry;
pub mod query;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ApiError, Result};
