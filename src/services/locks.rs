//! MongoDB-backed mutual exclusion for sync runs
//!
//! A single document (`_id = "sync"`) in the `locks` collection gates sync
//! batches system-wide. The document is created inert at startup and never
//! deleted; acquisition is one conditional `find_one_and_update`, so two
//! concurrent requests cannot both observe it inactive. A lock active for
//! longer than the stale threshold is treated as abandoned.

use bson::{doc, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ReturnDocument;
use tracing::{info, warn};

use crate::db::{collections, MongoClient};
use crate::types::Result;

pub const SYNC_LOCK_ID: &str = "sync";

/// Locks active longer than this are considered abandoned
const STALE_LOCK_SECS: i64 = 3600;

fn locks(mongo: &MongoClient) -> mongodb::Collection<Document> {
    mongo.documents(collections::LOCKS)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == 11000
    )
}

/// Create the inert lock document if it does not exist yet
pub async fn ensure_sync_lock(mongo: &MongoClient) -> Result<()> {
    let existing = locks(mongo).find_one(doc! { "_id": SYNC_LOCK_ID }).await?;
    if existing.is_some() {
        return Ok(());
    }

    let inert = doc! {
        "_id": SYNC_LOCK_ID,
        "active": false,
        "created_at": DateTime::now(),
    };
    match locks(mongo).insert_one(inert).await {
        Ok(_) => {
            info!("Provisioned inert sync lock");
            Ok(())
        }
        // Another instance provisioned it concurrently
        Err(e) if is_duplicate_key(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Attempt an atomic inactive-to-active transition of the sync lock
///
/// Returns true when this task now holds the lock, false when another sync
/// is running.
pub async fn try_acquire_sync_lock(
    mongo: &MongoClient,
    task_id: &str,
    dcc_names: &[String],
) -> Result<bool> {
    let now = DateTime::now();
    let stale_threshold = DateTime::from_millis(now.timestamp_millis() - STALE_LOCK_SECS * 1000);

    let filter = doc! {
        "_id": SYNC_LOCK_ID,
        "$or": [
            { "active": false },
            { "active": { "$exists": false } },
            { "started_at": { "$lt": stale_threshold } },
        ],
    };
    let update = doc! {
        "$set": {
            "active": true,
            "task_id": task_id,
            "dcc_names": dcc_names,
            "started_at": now,
            "updated_at": now,
        },
    };

    let result = locks(mongo)
        .find_one_and_update(filter, update)
        .upsert(true)
        .return_document(ReturnDocument::After)
        .await;

    match result {
        Ok(Some(lock)) => {
            let acquired = lock.get_str("task_id") == Ok(task_id);
            if acquired {
                info!(task_id = %task_id, "Acquired sync lock");
            } else {
                info!(
                    holder = lock.get_str("task_id").unwrap_or("unknown"),
                    "Sync lock held by another task"
                );
            }
            Ok(acquired)
        }
        Ok(None) => Ok(false),
        // Upsert raced another acquisition attempt
        Err(e) if is_duplicate_key(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Release the sync lock held by `task_id`
pub async fn release_sync_lock(mongo: &MongoClient, task_id: &str) -> Result<()> {
    let result = locks(mongo)
        .update_one(
            doc! { "_id": SYNC_LOCK_ID, "task_id": task_id },
            doc! { "$set": { "active": false, "completed_at": DateTime::now() } },
        )
        .await?;

    if result.modified_count > 0 {
        info!(task_id = %task_id, "Released sync lock");
    } else {
        warn!(task_id = %task_id, "Could not release sync lock - not held");
    }
    Ok(())
}

/// Current lock document, if provisioned
pub async fn current_sync_lock(mongo: &MongoClient) -> Result<Option<Document>> {
    Ok(locks(mongo).find_one(doc! { "_id": SYNC_LOCK_ID }).await?)
}
