//! Sync orchestrator
//!
//! Serializes ingestion batches behind the global sync lock and isolates
//! per-DCC failures. One accepted request fans out one task per targeted
//! DCC; tasks run concurrently and write disjoint submission-scoped data,
//! so only the lock itself is shared state. The lock is released after the
//! whole batch finishes, never per DCC.
//!
//! ```text
//! POST /sync ──> acquire lock ──> 202
//!                     │
//!                     ├── task(4dn):    fetch ─> stage ─> replace live
//!                     ├── task(hubmap): fetch ─> stage ─> replace live
//!                     └── join all ─> record outcomes ─> release lock
//! ```

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::MongoClient;
use crate::dcc_registry::{all_dcc_names, get_dcc_config, DccConfig};
use crate::services::locks;
use crate::services::materializer::{Datapackage, Materializer};
use crate::types::{ApiError, Result};

const BATCH_SIZE: usize = 1000;

/// How long finished tasks stay queryable via /sync/status
const TASK_RETENTION: Duration = Duration::from_secs(300);

/// Counts from replacing one DCC's live records
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceStats {
    pub tables: usize,
    pub records: u64,
}

/// Store operations the orchestrator needs; trait-shaped so tests can run
/// without MongoDB
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Atomic inactive-to-active lock transition; false when held elsewhere
    async fn try_acquire_lock(&self, task_id: &str, dcc_names: &[String]) -> Result<bool>;
    async fn release_lock(&self, task_id: &str) -> Result<()>;
    /// Stage a datapackage, then replace the submission's live records
    async fn replace_submission(
        &self,
        submission: &str,
        package: Datapackage,
    ) -> Result<ReplaceStats>;
    async fn lock_state(&self) -> Result<Option<Document>>;
}

/// MongoDB-backed store operations
pub struct MongoSyncStore {
    mongo: MongoClient,
}

impl MongoSyncStore {
    pub fn new(mongo: MongoClient) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl SyncStore for MongoSyncStore {
    async fn try_acquire_lock(&self, task_id: &str, dcc_names: &[String]) -> Result<bool> {
        locks::try_acquire_sync_lock(&self.mongo, task_id, dcc_names).await
    }

    async fn release_lock(&self, task_id: &str) -> Result<()> {
        locks::release_sync_lock(&self.mongo, task_id).await
    }

    async fn replace_submission(
        &self,
        submission: &str,
        package: Datapackage,
    ) -> Result<ReplaceStats> {
        let mut stats = ReplaceStats::default();

        for table in package.tables {
            let staging_name = format!("{}_staging_{}", table.name, submission);
            let staging = self.mongo.documents(&staging_name);
            staging.drop().await.ok();

            let mut rows = table.rows;
            for row in &mut rows {
                // The submission tag scopes every later read and replace
                row.insert("submission", submission);
            }
            for chunk in rows.chunks(BATCH_SIZE) {
                staging.insert_many(chunk.to_vec()).await?;
            }

            // Cutover: clear this submission's live rows, copy the staged
            // rows in, drop the staging collection
            let live = self.mongo.documents(&table.name);
            live.delete_many(doc! { "submission": submission }).await?;

            let mut cursor = staging.find(doc! {}).await?;
            let mut batch: Vec<Document> = Vec::with_capacity(BATCH_SIZE);
            while let Some(item) = cursor.next().await {
                let mut row = item?;
                row.remove("_id");
                batch.push(row);
                if batch.len() >= BATCH_SIZE {
                    live.insert_many(std::mem::take(&mut batch)).await?;
                }
            }
            if !batch.is_empty() {
                live.insert_many(batch).await?;
            }
            staging.drop().await.ok();

            stats.tables += 1;
            stats.records += rows.len() as u64;
            info!(
                table = %table.name,
                submission = %submission,
                records = rows.len(),
                "Replaced live records"
            );
        }

        Ok(stats)
    }

    async fn lock_state(&self) -> Result<Option<Document>> {
        locks::current_sync_lock(&self.mongo).await
    }
}

/// Lifecycle of a sync batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

/// Result of one DCC's ingestion task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DccOutcome {
    pub dcc: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub records: u64,
}

/// One sync batch as tracked in memory
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub id: String,
    pub dcc_names: Vec<String>,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<DccOutcome>,
}

/// Orchestrates lock-gated, concurrently fanned-out sync batches
pub struct SyncService {
    store: Arc<dyn SyncStore>,
    materializer: Arc<dyn Materializer>,
    fetch_timeout: Duration,
    tasks: Arc<RwLock<HashMap<String, SyncTask>>>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn SyncStore>,
        materializer: Arc<dyn Materializer>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            materializer,
            fetch_timeout,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a sync batch for the given DCCs (empty = all registered)
    ///
    /// Returns immediately after the lock transition; the batch itself runs
    /// in background tasks. Fails with `Conflict` when a sync is running.
    pub async fn start(&self, dcc_names: Vec<String>) -> Result<SyncTask> {
        let scope: Vec<String> = if dcc_names.is_empty() {
            all_dcc_names().iter().map(|n| n.to_string()).collect()
        } else {
            dcc_names
        };

        let task_id = Uuid::new_v4().to_string();
        if !self.store.try_acquire_lock(&task_id, &scope).await? {
            return Err(ApiError::Conflict);
        }

        let task = SyncTask {
            id: task_id.clone(),
            dcc_names: scope.clone(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            outcomes: Vec::new(),
        };
        self.tasks.write().await.insert(task_id.clone(), task.clone());

        info!(task_id = %task_id, dccs = ?scope, "Sync batch accepted");

        let store = Arc::clone(&self.store);
        let materializer = Arc::clone(&self.materializer);
        let tasks = Arc::clone(&self.tasks);
        let fetch_timeout = self.fetch_timeout;

        tokio::spawn(async move {
            run_batch(store, materializer, tasks, task_id, scope, fetch_timeout).await;
        });

        Ok(task)
    }

    /// Look up one tracked task
    pub async fn task(&self, task_id: &str) -> Option<SyncTask> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Recently started tasks, newest first
    pub async fn recent_tasks(&self) -> Vec<SyncTask> {
        let mut tasks: Vec<SyncTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        tasks
    }

    /// Current lock document from the store
    pub async fn lock_state(&self) -> Result<Option<Document>> {
        self.store.lock_state().await
    }
}

/// Supervise one batch: fan out, join, record, release
async fn run_batch(
    store: Arc<dyn SyncStore>,
    materializer: Arc<dyn Materializer>,
    tasks: Arc<RwLock<HashMap<String, SyncTask>>>,
    task_id: String,
    scope: Vec<String>,
    fetch_timeout: Duration,
) {
    let mut outcomes: Vec<DccOutcome> = Vec::new();
    let mut pending = Vec::new();

    for name in &scope {
        match get_dcc_config(name) {
            Ok(cfg) => {
                let store = Arc::clone(&store);
                let materializer = Arc::clone(&materializer);
                pending.push((
                    name.clone(),
                    tokio::spawn(async move {
                        run_dcc_sync(store, materializer, cfg, fetch_timeout).await
                    }),
                ));
            }
            Err(e) => outcomes.push(DccOutcome {
                dcc: name.clone(),
                ok: false,
                error: Some(e.to_string()),
                records: 0,
            }),
        }
    }

    for (name, handle) in pending {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push(DccOutcome {
                dcc: name,
                ok: false,
                error: Some(format!("ingestion task panicked: {}", e)),
                records: 0,
            }),
        }
    }

    let ok_count = outcomes.iter().filter(|o| o.ok).count();
    let status = if ok_count == outcomes.len() {
        TaskStatus::Completed
    } else if ok_count == 0 {
        TaskStatus::Failed
    } else {
        TaskStatus::CompletedWithErrors
    };

    if let Some(task) = tasks.write().await.get_mut(&task_id) {
        task.status = status;
        task.completed_at = Some(Utc::now());
        task.outcomes = outcomes;
    }

    // The whole batch, not each DCC, defines the sync window
    if let Err(e) = store.release_lock(&task_id).await {
        error!(task_id = %task_id, error = %e, "Failed to release sync lock");
    }

    info!(task_id = %task_id, status = ?status, "Sync batch finished");

    let retained_id = task_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(TASK_RETENTION).await;
        tasks.write().await.remove(&retained_id);
    });
}

/// One DCC's ingestion: fetch under deadline, stage, replace live records
async fn run_dcc_sync(
    store: Arc<dyn SyncStore>,
    materializer: Arc<dyn Materializer>,
    dcc: &'static DccConfig,
    fetch_timeout: Duration,
) -> DccOutcome {
    let package = match tokio::time::timeout(fetch_timeout, materializer.fetch_datapackage(dcc))
        .await
    {
        Err(_) => {
            let err = ApiError::Timeout(format!(
                "datapackage fetch for {} exceeded {}s",
                dcc.name,
                fetch_timeout.as_secs()
            ));
            warn!(dcc = %dcc.name, "{}", err);
            return DccOutcome {
                dcc: dcc.name.to_string(),
                ok: false,
                error: Some(err.to_string()),
                records: 0,
            };
        }
        Ok(Err(e)) => {
            warn!(dcc = %dcc.name, error = %e, "Datapackage fetch failed");
            return DccOutcome {
                dcc: dcc.name.to_string(),
                ok: false,
                error: Some(e.to_string()),
                records: 0,
            };
        }
        Ok(Ok(package)) => package,
    };

    match store.replace_submission(dcc.name, package).await {
        Ok(stats) => {
            info!(dcc = %dcc.name, records = stats.records, "DCC synced");
            DccOutcome {
                dcc: dcc.name.to_string(),
                ok: true,
                error: None,
                records: stats.records,
            }
        }
        Err(e) => {
            warn!(dcc = %dcc.name, error = %e, "Replacement failed");
            DccOutcome {
                dcc: dcc.name.to_string(),
                ok: false,
                error: Some(e.to_string()),
                records: 0,
            }
        }
    }
}
