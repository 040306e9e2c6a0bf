// src/providers/apollo.rs
//
// Apollo adapter.
//
// Covers three concerns against the same API key:
// - Organization search  -> company discovery
// - People search        -> contact discovery
// - People match         -> tier-2 email lookup (slot provider C)
//
// APOLLO API:
// - Org search:    POST /api/v1/mixed_companies/search
// - People search: POST /api/v1/mixed_people/search
// - People match:  POST /api/v1/people/match (reveals personal email)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db::models::{Company, Contact};
use crate::providers::{
    domain_of, CompanySearchProvider, ContactSearchProvider, ContactSearchRequest,
    DiscoveredCompany, DiscoveredContact, EmailLookup, EmailLookupProvider, ProviderError,
};

const APOLLO_BASE_URL: &str = "https://api.apollo.io/api/v1";
const PROVIDER: &str = "apollo";

#[derive(Clone)]
pub struct ApolloClient {
    http: Client,
    api_key: String,
}

impl ApolloClient {
    pub fn new(http: Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", APOLLO_BASE_URL, path);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-cache")
            .header("X-Api-Key", &self.api_key)
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

        response.json::<T>().await.map_err(|e| ProviderError::Malformed {
            provider: PROVIDER,
            detail: e.to_string(),
        })
    }
}

// ----------------------------
// Wire models
// ----------------------------

#[derive(Debug, Clone, Deserialize)]
struct OrgSearchResponse {
    #[serde(default)]
    organizations: Vec<ApolloOrg>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApolloOrg {
    name: Option<String>,
    website_url: Option<String>,
    primary_domain: Option<String>,
    industry: Option<String>,
    city: Option<String>,
    country: Option<String>,
    short_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PeopleSearchResponse {
    #[serde(default)]
    people: Vec<ApolloPerson>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApolloPerson {
    name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    title: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PeopleMatchResponse {
    person: Option<MatchedPerson>,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchedPerson {
    email: Option<String>,
}

impl ApolloPerson {
    fn display_name(&self) -> Option<String> {
        if let Some(name) = &self.name {
            if !name.trim().is_empty() {
                return Some(name.trim().to_string());
            }
        }
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{} {}", f.trim(), l.trim())),
            (Some(f), None) => Some(f.trim().to_string()),
            (None, Some(l)) => Some(l.trim().to_string()),
            (None, None) => None,
        }
    }
}

// ----------------------------
// Trait impls
// ----------------------------

#[async_trait]
impl CompanySearchProvider for ApolloClient {
    async fn search_companies(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<DiscoveredCompany>, ProviderError> {
        let body = json!({
            "q_organization_keyword_tags": [query],
            "page": 1,
            "per_page": limit,
        });

        let data: OrgSearchResponse = self.post_json("/mixed_companies/search", body).await?;

        info!(
            "apollo org search for '{}' returned {} organizations",
            query,
            data.organizations.len()
        );

        let companies = data
            .organizations
            .into_iter()
            .filter_map(|org| {
                let name = org.name?;
                let website = org.website_url.or(org.primary_domain);
                let location = match (org.city, org.country) {
                    (Some(city), Some(country)) => Some(format!("{}, {}", city, country)),
                    (Some(city), None) => Some(city),
                    (None, Some(country)) => Some(country),
                    (None, None) => None,
                };
                Some(DiscoveredCompany {
                    name,
                    website,
                    industry: org.industry,
                    location,
                    description: org.short_description,
                })
            })
            .collect();

        Ok(companies)
    }
}

#[async_trait]
impl ContactSearchProvider for ApolloClient {
    async fn search_contacts(
        &self,
        req: &ContactSearchRequest,
    ) -> Result<Vec<DiscoveredContact>, ProviderError> {
        let mut body = json!({
            "q_organization_name": req.company_name,
            "q_keywords": req.query,
            "page": 1,
            "per_page": req.limit,
        });

        if let Some(domain) = req.website.as_deref().and_then(domain_of) {
            body["q_organization_domains"] = json!(domain);
        }
        if !req.search_terms.is_empty() {
            body["person_titles"] = json!(req.search_terms);
        }

        let data: PeopleSearchResponse = self.post_json("/mixed_people/search", body).await?;

        info!(
            "apollo people search for '{}' returned {} people",
            req.company_name,
            data.people.len()
        );

        let contacts = data
            .people
            .into_iter()
            .filter_map(|person| {
                let name = person.display_name()?;
                Some(DiscoveredContact {
                    name,
                    role: person.title,
                    email: person.email.filter(|e| e.contains('@')),
                    // Apollo does not score people search hits; rank by
                    // position downstream.
                    probability: 50.0,
                })
            })
            .collect();

        Ok(contacts)
    }
}

#[async_trait]
impl EmailLookupProvider for ApolloClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn find_email(
        &self,
        contact: &Contact,
        company: &Company,
    ) -> Result<EmailLookup, ProviderError> {
        let mut body = json!({
            "name": contact.name,
            "organization_name": company.name,
            "reveal_personal_emails": false,
        });
        if let Some(domain) = company.website.as_deref().and_then(domain_of) {
            body["domain"] = json!(domain);
        }

        let data: PeopleMatchResponse = self.post_json("/people/match", body).await?;

        let email = data
            .person
            .and_then(|p| p.email)
            .filter(|e| e.contains('@') && !e.starts_with("email_not_unlocked"));

        let confidence = if email.is_some() { 85.0 } else { 0.0 };
        Ok(EmailLookup { email, confidence })
    }
}
