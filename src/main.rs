//! C2M2 Hub server binary

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use c2m2_hub::{
    config::Args,
    db::MongoClient,
    server::{self, AppState},
    services::{locks, HttpMaterializer, MongoSyncStore, SyncService},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("c2m2_hub={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  C2M2 Hub - file metadata service");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("MongoDB: {} ({})", args.database_url, args.database_name);
    info!(
        "Sync: {}",
        if args.sync_api_key().is_some() { "enabled" } else { "no API key configured" }
    );
    info!("======================================");

    // Connect to MongoDB
    let mongo = match MongoClient::new(&args.database_url, &args.database_name).await {
        Ok(client) => client,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    // The sync lock exists inert from provisioning onward
    locks::ensure_sync_lock(&mongo).await?;

    // Shared upstream HTTP client
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(args.upstream_timeout_secs))
        .build()?;

    let materializer = Arc::new(HttpMaterializer::new(
        http.clone(),
        args.materializer_url.clone(),
    ));
    let store = Arc::new(MongoSyncStore::new(mongo.clone()));
    let sync = Arc::new(SyncService::new(
        store,
        materializer,
        Duration::from_secs(args.datapackage_timeout_secs),
    ));

    let state = Arc::new(AppState::new(args, mongo, sync, http));
    server::run(state).await?;

    Ok(())
}
