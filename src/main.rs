use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use leadscout::billing::build_billing_client;
use leadscout::config::{self, StoreBackend};
use leadscout::db;
use leadscout::enrichment::ContactEnrichmentService;
use leadscout::jobs::processor::{JobProcessor, JobProcessorConfig};
use leadscout::jobs::service::SearchJobService;
use leadscout::providers::{build_company_provider, build_contact_provider, build_email_providers};
use leadscout::routes::jobs as job_routes;
use leadscout::store::{DynStore, JobStore, MemoryStore, PgStore};
use leadscout::AppState;

#[tokio::main]
async fn main() -> config::Result<()> {
    // 1. Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load configuration
    let cfg = config::load()?;
    info!("Starting leadscout in {:?} mode", cfg.env);

    // 3. Build the store backend
    let store: DynStore = match cfg.store_backend {
        StoreBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres store")?;
            let pool = db::create_pool(url).await?;
            info!("Connected to Postgres");
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store (STORE_BACKEND=memory)");
            Arc::new(MemoryStore::new())
        }
    };

    // 4. Build collaborators: shared HTTP client, providers, billing
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let worker_id = std::env::var("WORKER_ID").unwrap_or_else(|_| "worker-1".to_string());
    let enrichment = ContactEnrichmentService::new(
        store.clone(),
        build_contact_provider(&cfg, &http),
        build_email_providers(&cfg, &http),
    );
    let job_service = Arc::new(SearchJobService::new(
        store.clone(),
        build_company_provider(&cfg, &http),
        enrichment,
        build_billing_client(&cfg, &http),
        worker_id,
    ));
    let job_processor = Arc::new(JobProcessor::new(
        store.clone(),
        job_service.clone(),
        JobProcessorConfig::from_env(),
    ));

    let state = AppState {
        store,
        job_service,
        job_processor: job_processor.clone(),
        config: cfg.clone(),
    };

    // 5. Dispatch on MODE: server (default) | worker | server+worker
    let mode = std::env::var("MODE").unwrap_or_else(|_| "server".to_string());
    match mode.as_str() {
        "worker" => {
            job_processor.run().await;
            Ok(())
        }
        "server+worker" => {
            let processor = job_processor.clone();
            let worker_handle = tokio::spawn(async move {
                processor.run().await;
            });

            let server_handle = tokio::spawn(run_server(state, cfg.http_port));

            tokio::select! {
                _ = worker_handle => {
                    error!("worker exited unexpectedly");
                }
                result = server_handle => {
                    if let Ok(Err(e)) = result {
                        error!("server error: {:?}", e);
                    }
                }
            }
            Ok(())
        }
        _ => {
            run_server(state, cfg.http_port).await?;
            Ok(())
        }
    }
}

async fn run_server(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/jobs",
            post(job_routes::create_job_handler).get(job_routes::list_jobs_handler),
        )
        .route("/jobs/:id", get(job_routes::get_job_handler))
        .route("/jobs/:id/execute", post(job_routes::execute_job_handler))
        .route("/jobs/:id/cancel", post(job_routes::cancel_job_handler))
        .route("/jobs/:id/retry", post(job_routes::retry_job_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;

    Ok(())
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    // Probe the store with a harmless read; the nil id never exists.
    if let Err(err) = state.store.get_job(Uuid::nil()).await {
        error!("store health check failed: {:?}", err);
        return Json(json!({
            "status": "error",
            "store": "down",
        }));
    }

    Json(json!({
        "status": "ok",
        "env": format!("{:?}", state.config.env),
    }))
}
