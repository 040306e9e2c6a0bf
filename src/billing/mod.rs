// src/billing/mod.rs
//
// Credit-billing seam.
//
// The ledger itself lives in a separate service; this module only knows how
// to ask it to deduct credits for a completed unit of work. Billing runs
// after results are persisted and is best-effort: a deduction failure is
// logged by the caller, never rolled back, never retried in a loop.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;

/// One billable unit of work performed by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingAction {
    CompanySearch,
    ContactSearch,
    EmailSearch,
}

impl BillingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingAction::CompanySearch => "company_search",
            BillingAction::ContactSearch => "contact_search",
            BillingAction::EmailSearch => "email_search",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingOutcome {
    pub success: bool,
    pub new_balance: i64,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ledger error {status}: {body}")]
    Ledger { status: u16, body: String },

    #[error("malformed ledger payload: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait BillingClient: Send + Sync {
    async fn deduct(
        &self,
        user_id: Uuid,
        action: BillingAction,
    ) -> Result<BillingOutcome, BillingError>;
}

pub type DynBillingClient = Arc<dyn BillingClient>;

/// No-op client used when no ledger service is configured; approves every
/// deduction so local installs keep working.
pub struct NoopBillingClient;

#[async_trait]
impl BillingClient for NoopBillingClient {
    async fn deduct(
        &self,
        user_id: Uuid,
        action: BillingAction,
    ) -> Result<BillingOutcome, BillingError> {
        info!(
            "billing noop: would deduct {} for user {}",
            action.as_str(),
            user_id
        );
        Ok(BillingOutcome {
            success: true,
            new_balance: 0,
        })
    }
}

/// HTTP client for the credit-ledger service.
pub struct LedgerBillingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl LedgerBillingClient {
    pub fn new(http: Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }
}

#[derive(Debug, Serialize)]
struct DeductRequest<'a> {
    user_id: Uuid,
    action: &'a str,
}

#[async_trait]
impl BillingClient for LedgerBillingClient {
    async fn deduct(
        &self,
        user_id: Uuid,
        action: BillingAction,
    ) -> Result<BillingOutcome, BillingError> {
        let url = format!("{}/credits/deduct", self.base_url.trim_end_matches('/'));

        let mut req = self.http.post(&url).json(&DeductRequest {
            user_id,
            action: action.as_str(),
        });
        if let Some(key) = &self.api_key {
            req = req.header("X-Api-Key", key);
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Ledger { status, body });
        }

        let outcome: BillingOutcome = response
            .json()
            .await
            .map_err(|e| BillingError::Malformed(e.to_string()))?;

        info!(
            "deducted {} for user {} (balance: {})",
            action.as_str(),
            user_id,
            outcome.new_balance
        );

        Ok(outcome)
    }
}

/// Build the billing client from config.
pub fn build_billing_client(cfg: &Config, http: &Client) -> DynBillingClient {
    match &cfg.billing_base_url {
        Some(base_url) => Arc::new(LedgerBillingClient::new(
            http.clone(),
            base_url.clone(),
            cfg.billing_api_key.clone(),
        )),
        None => {
            warn!("BILLING_SERVICE_BASE_URL not set; using NoopBillingClient (no credits deducted)");
            Arc::new(NoopBillingClient)
        }
    }
}
