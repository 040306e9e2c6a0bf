// src/providers/hunter.rs
//
// Hunter email-finder adapter: the cheap tier-1 primary.
//
// HUNTER API:
// - GET /v2/email-finder?domain=&first_name=&last_name=&api_key=
//   Returns { data: { email, score } }; a miss comes back with email=null.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::db::models::{Company, Contact};
use crate::providers::{domain_of, EmailLookup, EmailLookupProvider, ProviderError};

const HUNTER_BASE_URL: &str = "https://api.hunter.io/v2";
const PROVIDER: &str = "hunter";

#[derive(Clone)]
pub struct HunterClient {
    http: Client,
    api_key: String,
}

impl HunterClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FinderResponse {
    data: Option<FinderData>,
}

#[derive(Debug, Clone, Deserialize)]
struct FinderData {
    email: Option<String>,
    score: Option<f32>,
}

/// Split "Jane van der Meer" into ("Jane", "van der Meer"); single-word
/// names use the same value for both parts.
fn split_name(full: &str) -> Option<(String, String)> {
    let mut parts = full.split_whitespace();
    let first = parts.next()?.to_string();
    let rest: Vec<&str> = parts.collect();
    let last = if rest.is_empty() {
        first.clone()
    } else {
        rest.join(" ")
    };
    Some((first, last))
}

#[async_trait]
impl EmailLookupProvider for HunterClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_email(
        &self,
        contact: &Contact,
        company: &Company,
    ) -> Result<EmailLookup, ProviderError> {
        let Some(domain) = company.website.as_deref().and_then(domain_of) else {
            // No domain, nothing to query against.
            return Ok(EmailLookup::default());
        };
        let Some((first_name, last_name)) = split_name(&contact.name) else {
            return Ok(EmailLookup::default());
        };

        let url = format!("{}/email-finder", HUNTER_BASE_URL);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("domain", domain.as_str()),
                ("first_name", first_name.as_str()),
                ("last_name", last_name.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: PROVIDER,
                status,
                body,
            });
        }

        let data: FinderResponse =
            response.json().await.map_err(|e| ProviderError::Malformed {
                provider: PROVIDER,
                detail: e.to_string(),
            })?;

        let (email, confidence) = match data.data {
            Some(d) => {
                let email = d.email.filter(|e| e.contains('@'));
                let confidence = d.score.unwrap_or(0.0);
                (email, confidence)
            }
            None => (None, 0.0),
        };

        info!(
            "hunter lookup for '{}' @ {}: {}",
            contact.name,
            domain,
            if email.is_some() { "hit" } else { "miss" }
        );

        Ok(EmailLookup { email, confidence })
    }
}
