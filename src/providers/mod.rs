// src/providers/mod.rs
//
// External search/enrichment provider seams.
//
// Each concern gets a trait, an HTTP adapter, and a Noop fallback used when
// the relevant API key is absent, so the pipeline keeps running end-to-end
// (with empty results) on unconfigured installs. Factories pick the adapter
// from config at startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::Config;
use crate::db::models::{Company, Contact};

pub mod apollo;
pub mod hunter;
pub mod prospeo;

pub use apollo::ApolloClient;
pub use hunter::HunterClient;
pub use prospeo::ProspeoClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed {provider} payload: {detail}")]
    Malformed {
        provider: &'static str,
        detail: String,
    },
}

/// A company candidate returned by the discovery provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredCompany {
    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Contact-finder request, already normalized by the enrichment layer.
#[derive(Debug, Clone)]
pub struct ContactSearchRequest {
    /// Normalized free-text query, "{companyName} {website}".
    pub query: String,
    pub company_name: String,
    pub website: Option<String>,
    /// Title/seniority terms derived from the discovery strategies.
    pub search_terms: Vec<String>,
    pub limit: usize,
}

/// A person candidate returned by the contact-finder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredContact {
    pub name: String,
    pub role: Option<String>,
    pub email: Option<String>,
    /// Confidence score 0.0-100.0
    pub probability: f32,
}

/// Result of a single email lookup attempt.
#[derive(Debug, Clone, Default)]
pub struct EmailLookup {
    pub email: Option<String>,
    pub confidence: f32,
}

#[async_trait]
pub trait CompanySearchProvider: Send + Sync {
    async fn search_companies(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<DiscoveredCompany>, ProviderError>;
}

pub type DynCompanySearchProvider = Arc<dyn CompanySearchProvider>;

#[async_trait]
pub trait ContactSearchProvider: Send + Sync {
    async fn search_contacts(
        &self,
        req: &ContactSearchRequest,
    ) -> Result<Vec<DiscoveredContact>, ProviderError>;
}

pub type DynContactSearchProvider = Arc<dyn ContactSearchProvider>;

#[async_trait]
pub trait EmailLookupProvider: Send + Sync {
    /// Short stable identifier, recorded as the email's source tag.
    fn name(&self) -> &'static str;

    async fn find_email(
        &self,
        contact: &Contact,
        company: &Company,
    ) -> Result<EmailLookup, ProviderError>;
}

pub type DynEmailLookupProvider = Arc<dyn EmailLookupProvider>;

/// The fixed provider line-up consumed by the tiered resolver: one cheap
/// primary and two independent fallbacks.
#[derive(Clone)]
pub struct EmailProviderSet {
    pub primary: DynEmailLookupProvider,
    pub fallback_b: DynEmailLookupProvider,
    pub fallback_c: DynEmailLookupProvider,
}

// ----------------------------
// Noop fallbacks
// ----------------------------

/// Used when no company-search key is configured (returns zero companies).
pub struct NoopCompanySearchProvider;

#[async_trait]
impl CompanySearchProvider for NoopCompanySearchProvider {
    async fn search_companies(
        &self,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<DiscoveredCompany>, ProviderError> {
        Ok(vec![])
    }
}

pub struct NoopContactSearchProvider;

#[async_trait]
impl ContactSearchProvider for NoopContactSearchProvider {
    async fn search_contacts(
        &self,
        _req: &ContactSearchRequest,
    ) -> Result<Vec<DiscoveredContact>, ProviderError> {
        Ok(vec![])
    }
}

pub struct NoopEmailLookupProvider;

#[async_trait]
impl EmailLookupProvider for NoopEmailLookupProvider {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn find_email(
        &self,
        _contact: &Contact,
        _company: &Company,
    ) -> Result<EmailLookup, ProviderError> {
        Ok(EmailLookup::default())
    }
}

// ----------------------------
// Factories
// ----------------------------

pub fn build_company_provider(
    cfg: &Config,
    http: &reqwest::Client,
) -> DynCompanySearchProvider {
    match &cfg.apollo_api_key {
        Some(key) => Arc::new(ApolloClient::new(http.clone(), key.clone())),
        None => {
            warn!("APOLLO_API_KEY not set; company discovery will return no results");
            Arc::new(NoopCompanySearchProvider)
        }
    }
}

pub fn build_contact_provider(
    cfg: &Config,
    http: &reqwest::Client,
) -> DynContactSearchProvider {
    match &cfg.apollo_api_key {
        Some(key) => Arc::new(ApolloClient::new(http.clone(), key.clone())),
        None => {
            warn!("APOLLO_API_KEY not set; contact discovery will return no results");
            Arc::new(NoopContactSearchProvider)
        }
    }
}

/// Assemble the tiered email line-up: Hunter as the cheap primary, Prospeo
/// and Apollo people-match as the two fallbacks. Missing keys degrade the
/// corresponding slot to a noop lookup.
pub fn build_email_providers(cfg: &Config, http: &reqwest::Client) -> EmailProviderSet {
    let primary: DynEmailLookupProvider = match &cfg.hunter_api_key {
        Some(key) => Arc::new(HunterClient::new(http.clone(), key.clone())),
        None => {
            warn!("HUNTER_API_KEY not set; primary email lookup disabled");
            Arc::new(NoopEmailLookupProvider)
        }
    };

    let fallback_b: DynEmailLookupProvider = match &cfg.prospeo_api_key {
        Some(key) => Arc::new(ProspeoClient::new(http.clone(), key.clone())),
        None => {
            warn!("PROSPEO_API_KEY not set; fallback email lookup (prospeo) disabled");
            Arc::new(NoopEmailLookupProvider)
        }
    };

    let fallback_c: DynEmailLookupProvider = match &cfg.apollo_api_key {
        Some(key) => Arc::new(ApolloClient::new(http.clone(), key.clone())),
        None => {
            warn!("APOLLO_API_KEY not set; fallback email lookup (apollo) disabled");
            Arc::new(NoopEmailLookupProvider)
        }
    };

    EmailProviderSet {
        primary,
        fallback_b,
        fallback_c,
    }
}

/// Strip scheme/www/path from a website value so it can be used as a domain
/// parameter. Returns None for blank input.
pub(crate) fn domain_of(website: &str) -> Option<String> {
    let trimmed = website.trim();
    if trimmed.is_empty() {
        return None;
    }
    let no_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let no_www = no_scheme.strip_prefix("www.").unwrap_or(no_scheme);
    let host = no_www.split('/').next().unwrap_or(no_www);
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}
