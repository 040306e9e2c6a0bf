// src/jobs/processor.rs
//
// Background job poller.
//
// Each cycle: reset stuck jobs, dequeue at most one pending job by
// priority, execute it under a hard timeout. An in-process busy flag guards
// against overlapping cycles and an owned-job-id set guards against double
// processing; together with the status-conditional claim these are the
// system's only mutual exclusion, which assumes a single-process deployment
// (see DESIGN.md for the horizontal-scaling boundary).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use lazy_static::lazy_static;
use tokio::sync::Mutex;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::jobs::service::{JobServiceError, SearchJobService};
use crate::store::{DynStore, JobStore};

lazy_static! {
    static ref WORKER_ID: String =
        std::env::var("WORKER_ID").unwrap_or_else(|_| "worker-1".to_string());
}

#[derive(Debug, Clone)]
pub struct JobProcessorConfig {
    /// How often the poll loop wakes up.
    pub poll_interval: Duration,
    /// Jobs processing longer than this are presumed dead and reset.
    pub stuck_after: chrono::Duration,
    /// Hard cap on a single job execution.
    pub execution_timeout: Duration,
}

impl Default for JobProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            stuck_after: chrono::Duration::minutes(5),
            execution_timeout: Duration::from_secs(120),
        }
    }
}

impl JobProcessorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(secs) = std::env::var("JOB_POLL_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse() {
                config.poll_interval = Duration::from_secs(secs);
            }
        }
        if let Ok(secs) = std::env::var("JOB_STUCK_AFTER_SECS") {
            if let Ok(secs) = secs.parse() {
                config.stuck_after = chrono::Duration::seconds(secs);
            }
        }
        if let Ok(secs) = std::env::var("JOB_EXECUTION_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.execution_timeout = Duration::from_secs(secs);
            }
        }
        config
    }
}

pub struct JobProcessor {
    store: DynStore,
    service: Arc<SearchJobService>,
    config: JobProcessorConfig,
    busy: AtomicBool,
    owned: Mutex<HashSet<Uuid>>,
}

impl JobProcessor {
    pub fn new(store: DynStore, service: Arc<SearchJobService>, config: JobProcessorConfig) -> Self {
        Self {
            store,
            service,
            config,
            busy: AtomicBool::new(false),
            owned: Mutex::new(HashSet::new()),
        }
    }

    /// Poll loop entry point; never returns. Run it in its own task.
    pub async fn run(self: Arc<Self>) {
        info!(
            "job processor starting (worker_id={}, poll={:?}, stuck_after={}s, timeout={:?})",
            *WORKER_ID,
            self.config.poll_interval,
            self.config.stuck_after.num_seconds(),
            self.config.execution_timeout
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // A cycle that outlives the interval must not overlap the next.
            if self.busy.swap(true, Ordering::SeqCst) {
                debug!("previous poll cycle still running; skipping tick");
                continue;
            }
            self.poll_once().await;
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    /// One poll cycle: recover stuck jobs, then execute at most one job.
    pub async fn poll_once(&self) {
        self.recover_stuck_jobs().await;

        match self.store.next_pending_job().await {
            Ok(Some(job)) => {
                self.execute_guarded(job.id).await;
            }
            Ok(None) => {
                debug!("no pending jobs");
            }
            Err(e) => {
                error!("failed to dequeue next job: {:?}", e);
            }
        }
    }

    /// A worker that died mid-execution never runs its own error handler;
    /// the staleness sweep is what gets its job back into the queue.
    async fn recover_stuck_jobs(&self) {
        let cutoff = Utc::now() - self.config.stuck_after;
        match self.store.reset_stuck_jobs(cutoff).await {
            Ok(0) => {}
            Ok(reset) => {
                warn!("reset {} stuck jobs back to pending", reset);
            }
            Err(e) => {
                error!("stuck-job recovery failed: {:?}", e);
            }
        }
    }

    /// Execute-immediately path for latency-sensitive callers; bypasses the
    /// poll loop but honors the same double-processing guard and timeout.
    pub async fn execute_now(&self, job_id: Uuid) -> Result<(), JobServiceError> {
        self.execute_guarded(job_id).await;
        Ok(())
    }

    async fn execute_guarded(&self, job_id: Uuid) {
        {
            let mut owned = self.owned.lock().await;
            if !owned.insert(job_id) {
                warn!("job {} is already being processed by this worker", job_id);
                return;
            }
        }

        let outcome = timeout(
            self.config.execution_timeout,
            self.service.execute_job(job_id),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("job {} execution errored: {}", job_id, e);
            }
            Err(_) => {
                // The cancelled future cannot run its own bookkeeping, so the
                // timeout drives the same retry/failure path here.
                error!(
                    "job {} exceeded the {:?} execution timeout",
                    job_id, self.config.execution_timeout
                );
                if let Err(e) = self
                    .service
                    .record_failure(job_id, "execution timed out")
                    .await
                {
                    error!("failed to record timeout for job {}: {}", job_id, e);
                }
            }
        }

        self.owned.lock().await.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::enrichment::ContactEnrichmentService;
    use crate::jobs::models::{JobSource, JobStatus, NewJob, SearchType};
    use crate::store::memory::MemoryStore;
    use crate::store::JobStore;
    use crate::testutil::{
        discovered_company, email_set, RecordingBillingClient, StubCompanyProvider,
        StubContactProvider, StubEmailProvider,
    };

    fn build(store: DynStore) -> Arc<JobProcessor> {
        let enrichment = ContactEnrichmentService::new(
            store.clone(),
            StubContactProvider::new(vec![]),
            email_set(
                StubEmailProvider::new("stub_primary", &[]),
                StubEmailProvider::new("stub_b", &[]),
                StubEmailProvider::new("stub_c", &[]),
            ),
        );
        let service = Arc::new(SearchJobService::new(
            store.clone(),
            StubCompanyProvider::new(vec![discovered_company("Acme Robotics", "https://acme.io")]),
            enrichment,
            RecordingBillingClient::new(),
            "test-worker".to_string(),
        ));
        Arc::new(JobProcessor::new(
            store,
            service,
            JobProcessorConfig::default(),
        ))
    }

    fn new_job(priority: i32) -> NewJob {
        NewJob {
            user_id: Uuid::new_v4(),
            query: "fintech in miami".to_string(),
            search_type: SearchType::Companies,
            source: JobSource::Api,
            priority,
            contact_search_config: None,
            metadata: json!({}),
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn test_poll_once_executes_highest_priority_job() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let processor = build(store.clone());

        let low = store.insert_job(new_job(1)).await.unwrap();
        let high = store.insert_job(new_job(9)).await.unwrap();

        processor.poll_once().await;

        let high = store.get_job(high.id).await.unwrap().unwrap();
        let low = store.get_job(low.id).await.unwrap().unwrap();
        assert_eq!(high.status, JobStatus::Completed);
        assert_eq!(low.status, JobStatus::Pending);

        // One job per cycle: the second cycle picks up the remaining job.
        processor.poll_once().await;
        let low = store.get_job(low.id).await.unwrap().unwrap();
        assert_eq!(low.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_stuck_job_is_recovered_then_reexecuted_once() {
        let store: DynStore = Arc::new(MemoryStore::new());

        let job = store.insert_job(new_job(0)).await.unwrap();
        // Simulate a worker that claimed the job and died.
        store.claim_pending(job.id, "dead-worker").await.unwrap();

        // Not yet stale: a sweep with a cutoff in the past leaves it alone.
        let past = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(store.reset_stuck_jobs(past).await.unwrap(), 0);

        // Stale: reset exactly once, then eligible for exactly one re-claim.
        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.reset_stuck_jobs(future).await.unwrap(), 1);
        assert_eq!(store.reset_stuck_jobs(future).await.unwrap(), 0);

        let recovered = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, JobStatus::Pending);

        assert!(store.claim_pending(job.id, "w2").await.unwrap().is_some());
        assert!(store.claim_pending(job.id, "w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_processor_recovers_and_completes_stuck_job() {
        let store: DynStore = Arc::new(MemoryStore::new());

        let job = store.insert_job(new_job(0)).await.unwrap();
        store.claim_pending(job.id, "dead-worker").await.unwrap();

        // A processor configured with a negative staleness window treats
        // every processing job as stuck, standing in for elapsed time.
        let mut config = JobProcessorConfig::default();
        config.stuck_after = chrono::Duration::seconds(-1);
        let enrichment = ContactEnrichmentService::new(
            store.clone(),
            StubContactProvider::new(vec![]),
            email_set(
                StubEmailProvider::new("stub_primary", &[]),
                StubEmailProvider::new("stub_b", &[]),
                StubEmailProvider::new("stub_c", &[]),
            ),
        );
        let service = Arc::new(SearchJobService::new(
            store.clone(),
            StubCompanyProvider::new(vec![]),
            enrichment,
            RecordingBillingClient::new(),
            "test-worker".to_string(),
        ));
        let processor = Arc::new(JobProcessor::new(store.clone(), service, config));

        processor.poll_once().await;

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_execute_now_bypasses_polling() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let processor = build(store.clone());

        let job = store.insert_job(new_job(0)).await.unwrap();
        processor.execute_now(job.id).await.unwrap();

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}
