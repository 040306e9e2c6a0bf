// src/jobs/progress.rs
//
// Progress reporting seam.
//
// Nested pipeline stages report through an injected sink instead of an
// optional callback threaded down the call stack. The store-backed sink is
// the only writer of `progress` on a running job; sink failures are logged
// and swallowed so a progress hiccup can never fail the work itself.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

use crate::jobs::models::JobProgress;
use crate::store::{DynStore, JobStore};

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: JobProgress);
}

pub type DynProgressSink = Arc<dyn ProgressSink>;

/// Writes progress snapshots onto the owning job row.
pub struct JobProgressSink {
    store: DynStore,
    job_id: Uuid,
}

impl JobProgressSink {
    pub fn new(store: DynStore, job_id: Uuid) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl ProgressSink for JobProgressSink {
    async fn report(&self, progress: JobProgress) {
        if let Err(e) = self.store.update_progress(self.job_id, &progress).await {
            warn!(
                "failed to persist progress for job {}: {:?}",
                self.job_id, e
            );
        }
    }
}

/// Sink that drops every update; used where no job row exists to report to.
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn report(&self, _progress: JobProgress) {}
}
