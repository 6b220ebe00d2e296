//! Services: DRS resolution, sync orchestration, locks, materializer seam

pub mod drs;
pub mod locks;
pub mod materializer;
pub mod sync;

pub use materializer::{Datapackage, EntityTable, HttpMaterializer, Materializer};
pub use sync::{DccOutcome, MongoSyncStore, SyncService, SyncStore, SyncTask, TaskStatus};
