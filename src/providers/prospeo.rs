// src/providers/prospeo.rs
//
// Prospeo email-finder adapter: tier-2 fallback (slot provider B).
//
// PROSPEO API:
// - POST /email-finder with X-KEY header, body { full_name, company }
//   Returns { error: bool, response: { email: { email }, email_status } }.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db::models::{Company, Contact};
use crate::providers::{domain_of, EmailLookup, EmailLookupProvider, ProviderError};

const PROSPEO_BASE_URL: &str = "https://api.prospeo.io";
const PROVIDER: &str = "prospeo";

#[derive(Clone)]
pub struct ProspeoClient {
    http: Client,
    api_key: String,
}

impl ProspeoClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FinderResponse {
    #[serde(default)]
    error: bool,
    response: Option<FinderPayload>,
}

#[derive(Debug, Clone, Deserialize)]
struct FinderPayload {
    email: Option<FoundEmail>,
    email_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FoundEmail {
    email: Option<String>,
}

#[async_trait]
impl EmailLookupProvider for ProspeoClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_email(
        &self,
        contact: &Contact,
        company: &Company,
    ) -> Result<EmailLookup, ProviderError> {
        let mut body = json!({
            "full_name": contact.name,
            "company": company.name,
        });
        if let Some(domain) = company.website.as_deref().and_then(domain_of) {
            body["company"] = json!(domain);
        }

        let url = format!("{}/email-finder", PROSPEO_BASE_URL);
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-KEY", &self.api_key)
            .json(&body)
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

        if data.error {
            return Ok(EmailLookup::default());
        }

        let payload = match data.response {
            Some(p) => p,
            None => return Ok(EmailLookup::default()),
        };

        let email = payload
            .email
            .and_then(|e| e.email)
            .filter(|e| e.contains('@'));
        let confidence = match payload.email_status.as_deref() {
            Some("VALID") => 90.0,
            Some("ACCEPT_ALL") => 60.0,
            _ if email.is_some() => 50.0,
            _ => 0.0,
        };

        info!(
            "prospeo lookup for '{}' @ {}: {}",
            contact.name,
            company.name,
            if email.is_some() { "hit" } else { "miss" }
        );

        Ok(EmailLookup { email, confidence })
    }
}
