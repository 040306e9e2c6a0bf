// src/store/memory.rs
//
// In-memory store adapter. Backs STORE_BACKEND=memory for local development
// and every unit test. One RwLock around all three maps keeps cross-record
// operations (claim, requeue, reset) atomic without per-row bookkeeping.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{Company, Contact, NewCompany, NewContact};
use crate::jobs::models::{Job, JobProgress, JobStatus, NewJob, DEFAULT_MAX_RETRIES};
use crate::store::{CompanyStore, ContactStore, JobStore, StoreError};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    companies: HashMap<Uuid, Company>,
    contacts: HashMap<Uuid, Contact>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            query: new.query,
            search_type: new.search_type,
            source: new.source,
            status: JobStatus::Pending,
            priority: new.priority,
            contact_search_config: new.contact_search_config,
            metadata: new.metadata,
            progress: JobProgress::default(),
            results: JsonValue::Null,
            result_count: 0,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            assigned_worker: None,
            started_at: None,
            completed_at: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn claim_pending(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            return Ok(None);
        }
        job.status = JobStatus::Processing;
        job.assigned_worker = Some(worker_id.to_string());
        job.started_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn next_pending_job(&self) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<&Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(pending.first().map(|j| (*j).clone()))
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        progress: &JobProgress,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.progress = progress.clone();
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        results: &JsonValue,
        result_count: i32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.results = results.clone();
            job.result_count = result_count;
            job.completed_at = Some(Utc::now());
            job.error = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn requeue_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = JobStatus::Pending;
            job.retry_count += 1;
            job.error = Some(error.to_string());
            job.assigned_worker = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.completed_at = Some(Utc::now());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn cancel_pending_job(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn retry_failed_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Failed || job.retry_count >= job.max_retries {
            return Ok(false);
        }
        job.status = JobStatus::Pending;
        job.retry_count += 1;
        job.error = None;
        job.completed_at = None;
        job.assigned_worker = None;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn reset_stuck_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut reset = 0;
        for job in inner.jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.started_at.map(|t| t < cutoff).unwrap_or(true);
            if stale {
                job.status = JobStatus::Pending;
                job.assigned_worker = None;
                job.updated_at = Utc::now();
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn cleanup_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            let old_terminal = job.status.is_terminal()
                && job.completed_at.map(|t| t < cutoff).unwrap_or(false);
            !old_terminal
        });
        Ok((before - inner.jobs.len()) as u64)
    }

    async fn failed_jobs_for_retry(&self) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Failed && j.retry_count < j.max_retries)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}

#[async_trait]
impl CompanyStore for MemoryStore {
    async fn insert_company(&self, new: NewCompany) -> Result<Company, StoreError> {
        let now = Utc::now();
        let company = Company {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            name: new.name,
            website: new.website,
            industry: new.industry,
            location: new.location,
            description: new.description,
            source_job_id: new.source_job_id,
            list_id: new.list_id,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.companies.insert(company.id, company.clone());
        Ok(company)
    }

    async fn companies_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Company>, StoreError> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.companies.get(id).cloned())
            .collect())
    }

    async fn companies_for_user(&self, user_id: Uuid) -> Result<Vec<Company>, StoreError> {
        let inner = self.inner.read().await;
        let mut companies: Vec<Company> = inner
            .companies
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        companies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(companies)
    }
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn contacts_for_company(&self, company_id: Uuid) -> Result<Vec<Contact>, StoreError> {
        let inner = self.inner.read().await;
        let mut contacts: Vec<Contact> = inner
            .contacts
            .values()
            .filter(|c| c.company_id == company_id)
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(contacts)
    }

    async fn insert_contact(&self, new: NewContact) -> Result<Contact, StoreError> {
        let now = Utc::now();
        let contact = Contact {
            id: Uuid::new_v4(),
            company_id: new.company_id,
            name: new.name,
            role: new.role,
            email: new.email,
            email_source: new.email_source,
            probability: new.probability,
            completed_searches: new.completed_searches,
            last_validated: None,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.contacts.get_mut(&contact.id) {
            existing.name = contact.name.clone();
            if contact.role.is_some() {
                existing.role = contact.role.clone();
            }
            if contact.email.is_some() {
                existing.email = contact.email.clone();
                existing.email_source = contact.email_source.clone();
            }
            existing.probability = contact.probability;
            for tag in &contact.completed_searches {
                if !existing.completed_searches.contains(tag) {
                    existing.completed_searches.push(tag.clone());
                }
            }
            if contact.last_validated.is_some() {
                existing.last_validated = contact.last_validated;
            }
            existing.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_contact_email_if_absent(
        &self,
        contact_id: Uuid,
        email: &str,
        source: &str,
        confidence: f32,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(contact) = inner.contacts.get_mut(&contact_id) else {
            return Ok(false);
        };
        if contact.email.is_some() {
            return Ok(false);
        }
        contact.email = Some(email.to_string());
        contact.email_source = Some(source.to_string());
        contact.probability = confidence;
        contact.last_validated = Some(Utc::now());
        contact.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_contact_searched(&self, contact_id: Uuid, tag: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(contact) = inner.contacts.get_mut(&contact_id) {
            if !contact.completed_searches.iter().any(|t| t == tag) {
                contact.completed_searches.push(tag.to_string());
            }
            contact.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_job(user_id: Uuid, priority: i32) -> NewJob {
        NewJob {
            user_id,
            query: "fintech in miami".to_string(),
            search_type: crate::jobs::models::SearchType::Companies,
            source: crate::jobs::models::JobSource::Api,
            priority,
            contact_search_config: None,
            metadata: json!({}),
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn test_claim_is_conditional_on_pending() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let job = store.insert_job(new_job(user, 0)).await.unwrap();

        let claimed = store.claim_pending(job.id, "w1").await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(claimed.unwrap().status, JobStatus::Processing);

        // Second claim must lose.
        let second = store.claim_pending(job.id, "w2").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_next_pending_orders_by_priority_then_age() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let _low = store.insert_job(new_job(user, 1)).await.unwrap();
        let high = store.insert_job(new_job(user, 5)).await.unwrap();

        let next = store.next_pending_job().await.unwrap().unwrap();
        assert_eq!(next.id, high.id);
    }

    #[tokio::test]
    async fn test_set_email_if_absent_is_first_writer_wins() {
        let store = MemoryStore::new();
        let contact = store
            .insert_contact(NewContact {
                company_id: Uuid::new_v4(),
                name: "Jane Roe".to_string(),
                role: None,
                email: None,
                email_source: None,
                probability: 80.0,
                completed_searches: vec![],
            })
            .await
            .unwrap();

        let first = store
            .set_contact_email_if_absent(contact.id, "jane@acme.io", "hunter", 90.0)
            .await
            .unwrap();
        assert!(first);

        let second = store
            .set_contact_email_if_absent(contact.id, "j.roe@acme.io", "prospeo", 70.0)
            .await
            .unwrap();
        assert!(!second);

        let stored = store
            .contacts_for_company(contact.company_id)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(stored.email.as_deref(), Some("jane@acme.io"));
        assert_eq!(stored.email_source.as_deref(), Some("hunter"));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_only_old_terminal_jobs() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let done = store.insert_job(new_job(user, 0)).await.unwrap();
        store.claim_pending(done.id, "w1").await.unwrap();
        store
            .complete_job(done.id, &json!({"companies": []}), 0)
            .await
            .unwrap();

        let pending = store.insert_job(new_job(user, 0)).await.unwrap();

        // Cutoff in the past: the completed job is too recent to delete.
        let old_cutoff = Utc::now() - chrono::Duration::days(30);
        assert_eq!(store.cleanup_old_jobs(old_cutoff).await.unwrap(), 0);

        // Cutoff just ahead of now: completed job goes, pending one stays.
        let fresh_cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.cleanup_old_jobs(fresh_cutoff).await.unwrap(), 1);
        assert!(store.get_job(done.id).await.unwrap().is_none());
        assert!(store.get_job(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retry_failed_job_respects_budget() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let mut new = new_job(user, 0);
        new.max_retries = Some(1);
        let job = store.insert_job(new).await.unwrap();

        store.claim_pending(job.id, "w1").await.unwrap();
        store.fail_job(job.id, "boom").await.unwrap();

        assert!(store.retry_failed_job(job.id).await.unwrap());
        // retry_count is now 1 == max_retries; further retries rejected once
        // the job fails again.
        store.claim_pending(job.id, "w1").await.unwrap();
        store.fail_job(job.id, "boom again").await.unwrap();
        assert!(!store.retry_failed_job(job.id).await.unwrap());
    }
}
