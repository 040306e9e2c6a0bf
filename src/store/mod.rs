// src/store/mod.rs
//
// Persistence seam for jobs, companies, and contacts.
//
// The orchestration layer only ever talks to these traits. Two adapters:
// - PgStore: sqlx/Postgres, the deployment backend
// - MemoryStore: RwLock'd maps for local dev and tests
//
// The contract every adapter must honor: per-record operations are atomic
// (conditional status transitions, set-email-if-absent), because the
// orchestration layer does read-merge-write without its own locking.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{Company, Contact, NewCompany, NewContact};
use crate::jobs::models::{Job, JobProgress, NewJob};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, new: NewJob) -> Result<Job, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list_jobs(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// Conditionally transition pending -> processing, stamping `started_at`
    /// and the claiming worker. Returns the claimed job, or None when the job
    /// does not exist or is not pending (someone else got there first).
    async fn claim_pending(&self, job_id: Uuid, worker_id: &str)
        -> Result<Option<Job>, StoreError>;

    /// Highest-priority pending job, oldest first within a priority.
    async fn next_pending_job(&self) -> Result<Option<Job>, StoreError>;

    async fn update_progress(&self, job_id: Uuid, progress: &JobProgress)
        -> Result<(), StoreError>;

    async fn complete_job(
        &self,
        job_id: Uuid,
        results: &JsonValue,
        result_count: i32,
    ) -> Result<(), StoreError>;

    /// processing -> pending with `retry_count + 1`; records the error that
    /// caused the requeue.
    async fn requeue_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError>;

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError>;

    /// pending -> failed. Returns false when the job is not pending.
    async fn cancel_pending_job(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError>;

    /// failed -> pending with `retry_count + 1`, only while retry budget
    /// remains. Returns false otherwise.
    async fn retry_failed_job(&self, job_id: Uuid) -> Result<bool, StoreError>;

    /// Reset jobs stuck in processing since before `cutoff` back to pending.
    /// Returns how many were reset.
    async fn reset_stuck_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete completed/failed jobs finished before `cutoff`.
    async fn cleanup_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Failed jobs that still have retry budget, for external schedulers.
    async fn failed_jobs_for_retry(&self) -> Result<Vec<Job>, StoreError>;
}

#[async_trait]
pub trait CompanyStore: Send + Sync {
    async fn insert_company(&self, new: NewCompany) -> Result<Company, StoreError>;

    async fn companies_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Company>, StoreError>;

    async fn companies_for_user(&self, user_id: Uuid) -> Result<Vec<Company>, StoreError>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn contacts_for_company(&self, company_id: Uuid) -> Result<Vec<Contact>, StoreError>;

    async fn insert_contact(&self, new: NewContact) -> Result<Contact, StoreError>;

    /// Write back a merged contact record. Adapters must not null out fields
    /// that are non-null in the database when the passed value is None; the
    /// merge itself happens in the enrichment layer.
    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError>;

    /// First-writer-wins email persistence: sets the email only when the
    /// stored value is currently null. Returns true when the write landed.
    async fn set_contact_email_if_absent(
        &self,
        contact_id: Uuid,
        email: &str,
        source: &str,
        confidence: f32,
    ) -> Result<bool, StoreError>;

    /// Union `tag` into the contact's `completed_searches`.
    async fn mark_contact_searched(&self, contact_id: Uuid, tag: &str) -> Result<(), StoreError>;
}

/// Everything the orchestration layer needs from persistence.
pub trait Store: JobStore + CompanyStore + ContactStore {}

impl<T: JobStore + CompanyStore + ContactStore> Store for T {}

pub type DynStore = Arc<dyn Store>;
