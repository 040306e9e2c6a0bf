// src/lib.rs

use std::sync::Arc;

pub mod batch;
pub mod billing;
pub mod config;
pub mod db;
pub mod enrichment;
pub mod jobs;
pub mod providers;
pub mod routes;
pub mod store;

#[cfg(test)]
pub mod testutil;

use jobs::processor::JobProcessor;
use jobs::service::SearchJobService;
use store::DynStore;

/// Shared state handed to the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: DynStore,
    pub job_service: Arc<SearchJobService>,
    pub job_processor: Arc<JobProcessor>,
    pub config: config::Config,
}
