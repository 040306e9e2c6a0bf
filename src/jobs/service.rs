// src/jobs/service.rs
//
// SearchJobService: owns the job state machine and the public job API.
//
// FLOW (execute_job):
// 1. Claim: conditional pending -> processing (idempotent no-op otherwise)
// 2. Company discovery (or load existing companies for contact-only jobs)
// 3. Contact enrichment via ContactEnrichmentService, when the type asks
// 4. Billing: one deduction per unit of work performed (skipped for
//    system-sourced jobs); best-effort, logged, never rolled back
// 5. Complete with results + result_count, or requeue/fail on error
//
// Progress phases for the standard flow are fixed:
// Finding companies -> Saving companies -> Finding contacts ->
// Processing credits -> Completed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::{BillingAction, DynBillingClient};
use crate::db::models::{Company, NewCompany};
use crate::enrichment::{
    CompanyEnrichment, ConfigError, ContactEnrichmentService, ContactSearchConfig,
    EnrichmentError,
};
use crate::jobs::models::{
    CompanySummary, Job, JobProgress, JobResults, JobStatus, NewJob, SearchType,
};
use crate::jobs::progress::{DynProgressSink, JobProgressSink};
use crate::providers::{DynCompanySearchProvider, ProviderError};
use crate::store::{CompanyStore, DynStore, JobStore, StoreError};

/// Companies requested from the discovery provider per job.
const COMPANY_DISCOVERY_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("job not found")]
    NotFound,

    #[error("job is not in a cancellable state")]
    NotCancellable,

    #[error("job is not retryable (not failed, or retry budget exhausted)")]
    NotRetryable,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("company discovery failed: {0}")]
    CompanyDiscovery(#[from] ProviderError),

    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),
}

pub struct SearchJobService {
    store: DynStore,
    company_provider: DynCompanySearchProvider,
    enrichment: ContactEnrichmentService,
    billing: DynBillingClient,
    worker_id: String,
}

impl SearchJobService {
    pub fn new(
        store: DynStore,
        company_provider: DynCompanySearchProvider,
        enrichment: ContactEnrichmentService,
        billing: DynBillingClient,
        worker_id: String,
    ) -> Self {
        Self {
            store,
            company_provider,
            enrichment,
            billing,
            worker_id,
        }
    }

    // ----------------------------
    // Public job API
    // ----------------------------

    /// Create a pending job. Validation failures are synchronous; nothing is
    /// persisted for an invalid request.
    pub async fn create_job(&self, new: NewJob) -> Result<Job, JobServiceError> {
        if new.search_type.enriches_contacts() {
            new.contact_search_config
                .clone()
                .unwrap_or_default()
                .validate()?;
        }

        let job = self.store.insert_job(new).await?;
        info!(
            "created job {} ({}, source={}, priority={})",
            job.id,
            job.search_type.as_str(),
            job.source.as_str(),
            job.priority
        );
        Ok(job)
    }

    /// Owner-scoped read: returns the job only when `user_id` matches.
    pub async fn get_job(&self, job_id: Uuid, user_id: Uuid) -> Result<Job, JobServiceError> {
        match self.store.get_job(job_id).await? {
            Some(job) if job.user_id == user_id => Ok(job),
            _ => Err(JobServiceError::NotFound),
        }
    }

    pub async fn list_jobs(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, JobServiceError> {
        Ok(self.store.list_jobs(user_id, limit).await?)
    }

    /// Cancel a job that has not been claimed yet. Running jobs cannot be
    /// cancelled; they are bounded by the processor's hard timeout instead.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<(), JobServiceError> {
        let cancelled = self
            .store
            .cancel_pending_job(job_id, "cancelled by user")
            .await?;
        if cancelled {
            info!("cancelled job {}", job_id);
            Ok(())
        } else {
            Err(JobServiceError::NotCancellable)
        }
    }

    /// Re-queue a failed job, respecting its retry budget.
    pub async fn retry_job(&self, job_id: Uuid) -> Result<(), JobServiceError> {
        let retried = self.store.retry_failed_job(job_id).await?;
        if retried {
            info!("requeued failed job {} for retry", job_id);
            Ok(())
        } else {
            Err(JobServiceError::NotRetryable)
        }
    }

    /// Delete terminal jobs older than `days_to_keep` days.
    pub async fn cleanup_old_jobs(&self, days_to_keep: i64) -> Result<u64, JobServiceError> {
        let cutoff = Utc::now() - Duration::days(days_to_keep);
        let deleted = self.store.cleanup_old_jobs(cutoff).await?;
        if deleted > 0 {
            info!("cleaned up {} jobs older than {} days", deleted, days_to_keep);
        }
        Ok(deleted)
    }

    /// Failed jobs with retry budget left, for external retry schedulers.
    pub async fn failed_jobs_for_retry(&self) -> Result<Vec<Job>, JobServiceError> {
        Ok(self.store.failed_jobs_for_retry().await?)
    }

    // ----------------------------
    // Execution
    // ----------------------------

    /// Run one job to a terminal or requeued state. Re-invoking on a job
    /// that is no longer pending is an idempotent no-op; the job is never
    /// left in processing after an error this worker can observe.
    pub async fn execute_job(&self, job_id: Uuid) -> Result<(), JobServiceError> {
        let Some(job) = self.store.claim_pending(job_id, &self.worker_id).await? else {
            return match self.store.get_job(job_id).await? {
                None => Err(JobServiceError::NotFound),
                Some(job) => {
                    info!(
                        "job {} is {}, nothing to execute",
                        job_id,
                        job.status.as_str()
                    );
                    Ok(())
                }
            };
        };

        info!(
            "worker {} executing job {} ({} '{}')",
            self.worker_id,
            job.id,
            job.search_type.as_str(),
            job.query
        );

        let sink: DynProgressSink = Arc::new(JobProgressSink::new(self.store.clone(), job.id));

        match self.run_phases(&job, &sink).await {
            Ok(results) => {
                let result_count = results.companies.len() as i32;
                let payload = serde_json::to_value(&results).unwrap_or(JsonValue::Null);
                self.store
                    .complete_job(job.id, &payload, result_count)
                    .await?;
                sink.report(
                    JobProgress::new("Completed", result_count as u32, result_count as u32)
                        .with_message(format!(
                            "Found {} companies, {} contacts, {} emails",
                            results.companies.len(),
                            results.contacts_found,
                            results.emails_found
                        )),
                )
                .await;
                info!(
                    "worker {} completed job {} ({} companies, {} contacts, {} emails)",
                    self.worker_id,
                    job.id,
                    results.companies.len(),
                    results.contacts_found,
                    results.emails_found
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "worker {} failed job {} during execution: {}",
                    self.worker_id, job.id, e
                );
                self.record_failure(job.id, &e.to_string()).await
            }
        }
    }

    /// Retry/fail bookkeeping for an execution error. Also used by the
    /// processor when a job exceeds its hard timeout (the cancelled future
    /// never gets to run this itself).
    pub async fn record_failure(&self, job_id: Uuid, error: &str) -> Result<(), JobServiceError> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Err(JobServiceError::NotFound);
        };

        // A job that already reached a terminal state (e.g. completed just
        // before a timeout fired) is left alone.
        if job.status != JobStatus::Processing {
            return Ok(());
        }

        if job.has_retries_left() {
            warn!(
                "requeueing job {} for retry {}/{}: {}",
                job_id,
                job.retry_count + 1,
                job.max_retries,
                error
            );
            self.store.requeue_job(job_id, error).await?;
        } else {
            error!(
                "job {} exhausted {} retries, marking failed: {}",
                job_id, job.max_retries, error
            );
            self.store.fail_job(job_id, error).await?;
        }
        Ok(())
    }

    async fn run_phases(
        &self,
        job: &Job,
        sink: &DynProgressSink,
    ) -> Result<JobResults, JobServiceError> {
        let companies = if job.search_type.discovers_companies() {
            self.discover_companies(job, sink).await?
        } else {
            self.load_existing_companies(job).await?
        };

        let mut billable_actions: Vec<BillingAction> = Vec::new();
        if job.search_type.discovers_companies() {
            billable_actions.push(BillingAction::CompanySearch);
        }

        let mut enrichments: Vec<CompanyEnrichment> = Vec::new();
        if job.search_type.enriches_contacts() && !companies.is_empty() {
            let config = job
                .contact_search_config
                .clone()
                .unwrap_or_else(ContactSearchConfig::default);
            sink.report(
                JobProgress::new("Finding contacts", 0, companies.len() as u32)
                    .with_message(format!("Searching contacts for {} companies", companies.len())),
            )
            .await;

            enrichments = self
                .enrichment
                .search_contacts(
                    &companies,
                    &config,
                    job.id,
                    job.search_type.resolves_emails(),
                    sink,
                )
                .await?;

            billable_actions.push(if job.search_type.resolves_emails() {
                BillingAction::EmailSearch
            } else {
                BillingAction::ContactSearch
            });
        }

        self.process_credits(job, &billable_actions, sink).await;

        Ok(build_results(&companies, &enrichments))
    }

    async fn discover_companies(
        &self,
        job: &Job,
        sink: &DynProgressSink,
    ) -> Result<Vec<Company>, JobServiceError> {
        sink.report(
            JobProgress::new("Finding companies", 0, 1)
                .with_message(format!("Searching companies for '{}'", job.query)),
        )
        .await;

        // Discovery failing outright is a phase-level error: the whole job
        // depends on it, so it goes through the retry path rather than
        // completing with a silently empty result.
        let discovered = self
            .company_provider
            .search_companies(&job.query, COMPANY_DISCOVERY_LIMIT)
            .await?;

        let total = discovered.len() as u32;
        sink.report(
            JobProgress::new("Saving companies", 0, total)
                .with_message(format!("Saving {} companies", total)),
        )
        .await;

        let list_id = job
            .metadata
            .get("list_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        let mut saved = Vec::with_capacity(discovered.len());
        for (index, company) in discovered.into_iter().enumerate() {
            let inserted = self
                .store
                .insert_company(NewCompany {
                    user_id: job.user_id,
                    name: company.name,
                    website: company.website,
                    industry: company.industry,
                    location: company.location,
                    description: company.description,
                    source_job_id: Some(job.id),
                    list_id,
                })
                .await?;
            saved.push(inserted);
            sink.report(JobProgress::new("Saving companies", index as u32 + 1, total))
                .await;
        }

        Ok(saved)
    }

    /// contact-only jobs operate on an explicit company-id list from the
    /// job metadata, or on the user's full company set.
    async fn load_existing_companies(&self, job: &Job) -> Result<Vec<Company>, JobServiceError> {
        let ids: Option<Vec<Uuid>> = job
            .metadata
            .get("company_ids")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| Uuid::parse_str(s).ok())
                    .collect()
            });

        let companies = match ids {
            Some(ids) if !ids.is_empty() => self.store.companies_by_ids(&ids).await?,
            _ => self.store.companies_for_user(job.user_id).await?,
        };
        Ok(companies)
    }

    /// Deduct one credit action per unit of work performed. Best-effort:
    /// results are already persisted, so a ledger hiccup is logged and the
    /// job still completes.
    async fn process_credits(
        &self,
        job: &Job,
        actions: &[BillingAction],
        sink: &DynProgressSink,
    ) {
        if !job.source.is_billable() {
            info!(
                "job {} is {}-sourced; skipping billing",
                job.id,
                job.source.as_str()
            );
            return;
        }
        if actions.is_empty() {
            return;
        }

        let total = actions.len() as u32;
        sink.report(JobProgress::new("Processing credits", 0, total)).await;

        for (index, action) in actions.iter().enumerate() {
            match self.billing.deduct(job.user_id, *action).await {
                Ok(outcome) if !outcome.success => {
                    warn!(
                        "billing declined {} for user {} on job {} (balance: {})",
                        action.as_str(),
                        job.user_id,
                        job.id,
                        outcome.new_balance
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        "billing deduction {} failed for job {}: {}",
                        action.as_str(),
                        job.id,
                        e
                    );
                }
            }
            sink.report(JobProgress::new("Processing credits", index as u32 + 1, total))
                .await;
        }
    }
}

fn build_results(companies: &[Company], enrichments: &[CompanyEnrichment]) -> JobResults {
    let summaries = companies
        .iter()
        .map(|company| {
            let contact_count = enrichments
                .iter()
                .find(|e| e.company.id == company.id)
                .map(|e| e.contacts.len() as u32)
                .unwrap_or(0);
            CompanySummary {
                id: company.id,
                name: company.name.clone(),
                website: company.website.clone(),
                contact_count,
            }
        })
        .collect();

    JobResults {
        companies: summaries,
        contacts_found: enrichments.iter().map(|e| e.contacts.len() as u32).sum(),
        emails_found: enrichments.iter().map(|e| e.emails_found).sum(),
    }
}
