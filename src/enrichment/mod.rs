// src/enrichment/mod.rs
//
// Per-company contact discovery and dedupe.
//
// FLOW (per company, fanned out through BatchExecutor at concurrency 3):
// 1. Query the contact-finder with "{name} {website}" plus strategy terms
// 2. Dedupe candidates against stored contacts (email match, then name match)
// 3. Merge on match / insert tagged with the job on miss
// 4. Optionally resolve emails for the top ranked contacts (tiered fallback)
// 5. Report one progress update per company through the injected sink
//
// Provider failures degrade to an empty candidate list for that company;
// store failures are phase-level and bubble up to the job state machine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::BatchExecutor;
use crate::db::models::{Company, Contact, NewContact};
use crate::jobs::models::JobProgress;
use crate::jobs::progress::DynProgressSink;
use crate::providers::{
    ContactSearchRequest, DiscoveredContact, DynContactSearchProvider, EmailProviderSet,
};
use crate::store::{ContactStore, DynStore, StoreError};

pub mod email_tiers;

pub use email_tiers::{EmailSearchResult, TieredEmailResolver, EXHAUSTED_TAG};

/// Companies processed in parallel per job; matched to per-provider rate
/// limits, not an architectural constant.
pub const COMPANY_CONCURRENCY: usize = 3;

/// Contacts fed into the tiered email resolver per company.
pub const EMAIL_RESOLUTION_SLOTS: usize = 3;

const CONTACT_FETCH_LIMIT: usize = 10;

/// How to pick people at a discovered company. Closed set: adding a variant
/// forces every dispatch site to handle it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryStrategy {
    /// Founders and senior leadership.
    DecisionMakers,
    /// Everyone in a named department ("engineering", "sales", ...).
    Department { name: String },
    /// A caller-supplied title filter.
    CustomTitle { target: String },
}

impl DiscoveryStrategy {
    /// Title/seniority terms handed to the contact-finder.
    pub fn search_terms(&self) -> Vec<String> {
        match self {
            DiscoveryStrategy::DecisionMakers => vec![
                "founder".to_string(),
                "ceo".to_string(),
                "cto".to_string(),
                "coo".to_string(),
                "vp".to_string(),
            ],
            DiscoveryStrategy::Department { name } => {
                vec![format!("head of {}", name), name.clone()]
            }
            DiscoveryStrategy::CustomTitle { target } => vec![target.clone()],
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no discovery strategy enabled")]
    NoStrategy,

    #[error("custom title strategy requires a target")]
    MissingCustomTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSearchConfig {
    pub strategies: Vec<DiscoveryStrategy>,
    #[serde(default = "default_max_contacts")]
    pub max_contacts_per_company: usize,
}

fn default_max_contacts() -> usize {
    EMAIL_RESOLUTION_SLOTS
}

impl Default for ContactSearchConfig {
    fn default() -> Self {
        Self {
            strategies: vec![DiscoveryStrategy::DecisionMakers],
            max_contacts_per_company: default_max_contacts(),
        }
    }
}

impl ContactSearchConfig {
    /// Reject a config before any work starts: at least one strategy, and a
    /// custom-title strategy must carry a non-empty target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategies.is_empty() {
            return Err(ConfigError::NoStrategy);
        }
        for strategy in &self.strategies {
            if let DiscoveryStrategy::CustomTitle { target } = strategy {
                if target.trim().is_empty() {
                    return Err(ConfigError::MissingCustomTarget);
                }
            }
        }
        Ok(())
    }

    fn all_search_terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        for strategy in &self.strategies {
            for term in strategy.search_terms() {
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }
        terms
    }
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of enriching one company.
#[derive(Debug, Clone)]
pub struct CompanyEnrichment {
    pub company: Company,
    pub contacts: Vec<Contact>,
    pub new_contacts: u32,
    pub emails_found: u32,
}

pub struct ContactEnrichmentService {
    store: DynStore,
    contact_provider: DynContactSearchProvider,
    resolver: TieredEmailResolver,
    batch: BatchExecutor,
}

impl ContactEnrichmentService {
    pub fn new(
        store: DynStore,
        contact_provider: DynContactSearchProvider,
        email_providers: EmailProviderSet,
    ) -> Self {
        let resolver = TieredEmailResolver::new(store.clone(), email_providers);
        Self {
            store,
            contact_provider,
            resolver,
            batch: BatchExecutor::new(COMPANY_CONCURRENCY),
        }
    }

    /// Discover and upsert contacts for every company, fanned out with
    /// bounded concurrency. One failing company never blocks the others;
    /// store failures surface after the whole batch has settled.
    pub async fn search_contacts(
        &self,
        companies: &[Company],
        config: &ContactSearchConfig,
        job_id: Uuid,
        resolve_emails: bool,
        progress: &DynProgressSink,
    ) -> Result<Vec<CompanyEnrichment>, EnrichmentError> {
        config.validate()?;

        let total = companies.len() as u32;
        let done = Arc::new(AtomicU32::new(0));

        let results = self
            .batch
            .run(companies.to_vec(), |company| {
                let done = done.clone();
                async move {
                    let result = self
                        .enrich_company(&company, config, job_id, resolve_emails)
                        .await;
                    let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                    let message = match &result {
                        Ok(e) => format!(
                            "Found {} contacts for {}",
                            e.contacts.len(),
                            company.name
                        ),
                        Err(_) => format!("Contact search failed for {}", company.name),
                    };
                    progress
                        .report(
                            JobProgress::new("Finding contacts", completed, total)
                                .with_message(message),
                        )
                        .await;
                    result
                }
            })
            .await;

        let mut enrichments = Vec::with_capacity(results.len());
        let mut first_error: Option<EnrichmentError> = None;
        for result in results {
            match result {
                Ok(enrichment) => enrichments.push(enrichment),
                Err(e) => {
                    warn!("company enrichment failed: {:?}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        // A store-level failure means the phase itself is broken; let the
        // job state machine retry it.
        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(enrichments)
    }

    async fn enrich_company(
        &self,
        company: &Company,
        config: &ContactSearchConfig,
        job_id: Uuid,
        resolve_emails: bool,
    ) -> Result<CompanyEnrichment, EnrichmentError> {
        let request = ContactSearchRequest {
            query: normalized_query(company),
            company_name: company.name.clone(),
            website: company.website.clone(),
            search_terms: config.all_search_terms(),
            limit: CONTACT_FETCH_LIMIT,
        };

        // Provider failure degrades to zero candidates for this company.
        let candidates = match self.contact_provider.search_contacts(&request).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    "contact provider failed for company {} ({}): {}",
                    company.id, company.name, e
                );
                Vec::new()
            }
        };

        let job_tag = job_tag(job_id);
        let (contacts, new_contacts) = self
            .upsert_candidates(company.id, candidates, &job_tag)
            .await?;

        let mut emails_found = 0;
        let mut contacts = contacts;
        if resolve_emails && !contacts.is_empty() {
            let ranked = rank_for_resolution(&contacts, config.max_contacts_per_company);
            let results = self.resolver.resolve(&ranked, company).await;
            emails_found = results
                .iter()
                .filter(|r| r.email.is_some() && r.source != email_tiers::SOURCE_EXISTING)
                .count() as u32;

            // Fold resolved emails back into the local copies.
            for result in &results {
                if let Some(email) = &result.email {
                    if let Some(contact) = contacts.iter_mut().find(|c| c.id == result.contact_id)
                    {
                        if contact.email.is_none() {
                            contact.email = Some(email.clone());
                            contact.email_source = Some(result.source.clone());
                            contact.probability = result.confidence;
                        }
                    }
                }
            }
        }

        info!(
            "enriched company {} ({}): {} contacts ({} new, {} emails found)",
            company.id,
            company.name,
            contacts.len(),
            new_contacts,
            emails_found
        );

        Ok(CompanyEnrichment {
            company: company.clone(),
            contacts,
            new_contacts,
            emails_found,
        })
    }

    /// Dedupe candidates against stored contacts: case-insensitive email
    /// match first, else case-insensitive name match. Matches are merged
    /// (new non-null fields win, tag sets union, `last_validated` stamped);
    /// misses insert a contact tagged with the job.
    async fn upsert_candidates(
        &self,
        company_id: Uuid,
        candidates: Vec<DiscoveredContact>,
        job_tag: &str,
    ) -> Result<(Vec<Contact>, u32), EnrichmentError> {
        let mut existing = self.store.contacts_for_company(company_id).await?;
        let mut new_contacts = 0;

        for candidate in candidates {
            let matched = find_match(&existing, &candidate);

            match matched {
                Some(index) => {
                    let current = &existing[index];
                    let mut merged = current.clone();
                    merged.role = candidate.role.clone().or(merged.role);
                    if candidate.email.is_some() && merged.email.is_none() {
                        merged.email = candidate.email.clone();
                        merged.email_source = Some("contact_search".to_string());
                    }
                    merged.probability = merged.probability.max(candidate.probability);
                    if !merged.completed_searches.iter().any(|t| t == job_tag) {
                        merged.completed_searches.push(job_tag.to_string());
                    }
                    merged.last_validated = Some(Utc::now());

                    self.store.update_contact(&merged).await?;
                    existing[index] = merged;
                }
                None => {
                    let inserted = self
                        .store
                        .insert_contact(NewContact {
                            company_id,
                            name: candidate.name.clone(),
                            role: candidate.role.clone(),
                            email: candidate.email.clone(),
                            email_source: candidate
                                .email
                                .as_ref()
                                .map(|_| "contact_search".to_string()),
                            probability: candidate.probability,
                            completed_searches: vec![job_tag.to_string()],
                        })
                        .await?;
                    existing.push(inserted);
                    new_contacts += 1;
                }
            }
        }

        Ok((existing, new_contacts))
    }
}

/// The contact-finder query: "{companyName} {website}".
fn normalized_query(company: &Company) -> String {
    match &company.website {
        Some(website) if !website.trim().is_empty() => {
            format!("{} {}", company.name.trim(), website.trim())
        }
        _ => company.name.trim().to_string(),
    }
}

fn job_tag(job_id: Uuid) -> String {
    format!("job:{}", job_id)
}

fn find_match(existing: &[Contact], candidate: &DiscoveredContact) -> Option<usize> {
    if let Some(email) = &candidate.email {
        let email = email.to_lowercase();
        if let Some(index) = existing.iter().position(|c| {
            c.email
                .as_deref()
                .map(|e| e.to_lowercase() == email)
                .unwrap_or(false)
        }) {
            return Some(index);
        }
    }

    let name = candidate.name.trim().to_lowercase();
    existing
        .iter()
        .position(|c| c.name.trim().to_lowercase() == name)
}

/// Rank contacts for email resolution: confidence descending, stable within
/// ties (discovery order), skipping contacts that previous jobs already
/// searched exhaustively without finding an email. Takes the top `slots`.
fn rank_for_resolution(contacts: &[Contact], slots: usize) -> Vec<Contact> {
    let mut ranked: Vec<Contact> = contacts
        .iter()
        .filter(|c| {
            c.email.is_some() || !c.completed_searches.iter().any(|t| t == EXHAUSTED_TAG)
        })
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(slots.min(EMAIL_RESOLUTION_SLOTS));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::db::models::NewCompany;
    use crate::jobs::progress::NoopProgressSink;
    use crate::store::memory::MemoryStore;
    use crate::store::{CompanyStore, ContactStore};
    use crate::testutil::{discovered_contact, email_set, StubContactProvider, StubEmailProvider};

    fn contact(name: &str, probability: f32, email: Option<&str>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            name: name.to_string(),
            role: None,
            email: email.map(String::from),
            email_source: None,
            probability,
            completed_searches: vec![],
            last_validated: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_rejects_empty_strategies() {
        let config = ContactSearchConfig {
            strategies: vec![],
            max_contacts_per_company: 3,
        };
        assert_eq!(config.validate(), Err(ConfigError::NoStrategy));
    }

    #[test]
    fn test_validate_rejects_blank_custom_target() {
        let config = ContactSearchConfig {
            strategies: vec![DiscoveryStrategy::CustomTitle {
                target: "  ".to_string(),
            }],
            max_contacts_per_company: 3,
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingCustomTarget));

        let ok = ContactSearchConfig {
            strategies: vec![DiscoveryStrategy::CustomTitle {
                target: "head of growth".to_string(),
            }],
            max_contacts_per_company: 3,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ContactSearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rank_for_resolution_orders_and_truncates() {
        let contacts = vec![
            contact("Low", 20.0, None),
            contact("High", 90.0, None),
            contact("Mid A", 50.0, None),
            contact("Mid B", 50.0, None),
        ];
        let ranked = rank_for_resolution(&contacts, 3);
        let names: Vec<&str> = ranked.iter().map(|c| c.name.as_str()).collect();
        // Ties keep discovery order: Mid A before Mid B.
        assert_eq!(names, vec!["High", "Mid A", "Mid B"]);
    }

    #[test]
    fn test_rank_for_resolution_skips_exhausted_contacts() {
        let mut exhausted = contact("Searched", 95.0, None);
        exhausted.completed_searches.push(EXHAUSTED_TAG.to_string());
        let fresh = contact("Fresh", 40.0, None);

        let ranked = rank_for_resolution(&[exhausted, fresh], 3);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].name, "Fresh");
    }

    #[test]
    fn test_normalized_query_includes_website() {
        let mut company = Company {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Acme Robotics".to_string(),
            website: Some("https://acme.io".to_string()),
            industry: None,
            location: None,
            description: None,
            source_job_id: None,
            list_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(normalized_query(&company), "Acme Robotics https://acme.io");

        company.website = None;
        assert_eq!(normalized_query(&company), "Acme Robotics");
    }

    #[test]
    fn test_find_match_prefers_email_over_name() {
        let stored = vec![
            contact("Jane Roe", 50.0, Some("jane@acme.io")),
            contact("John Doe", 50.0, None),
        ];

        // Same email, different display name: still the email match.
        let by_email = DiscoveredContact {
            name: "J. Roe".to_string(),
            role: None,
            email: Some("JANE@ACME.IO".to_string()),
            probability: 60.0,
        };
        assert_eq!(find_match(&stored, &by_email), Some(0));

        let by_name = DiscoveredContact {
            name: "john doe".to_string(),
            role: None,
            email: None,
            probability: 60.0,
        };
        assert_eq!(find_match(&stored, &by_name), Some(1));

        let miss = DiscoveredContact {
            name: "Someone Else".to_string(),
            role: None,
            email: None,
            probability: 60.0,
        };
        assert_eq!(find_match(&stored, &miss), None);
    }

    fn enrichment_service(
        store: DynStore,
        provider: std::sync::Arc<StubContactProvider>,
    ) -> ContactEnrichmentService {
        ContactEnrichmentService::new(
            store,
            provider,
            email_set(
                StubEmailProvider::new("stub_primary", &[]),
                StubEmailProvider::new("stub_b", &[]),
                StubEmailProvider::new("stub_c", &[]),
            ),
        )
    }

    async fn seed_company(store: &DynStore) -> Company {
        store
            .insert_company(NewCompany {
                user_id: Uuid::new_v4(),
                name: "Acme Robotics".to_string(),
                website: Some("https://acme.io".to_string()),
                industry: None,
                location: None,
                description: None,
                source_job_id: None,
                list_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rerunning_enrichment_updates_instead_of_duplicating() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let company = seed_company(&store).await;
        let provider = StubContactProvider::new(vec![
            discovered_contact("Ada One", 90.0),
            discovered_contact("Bob Two", 60.0),
        ]);
        let service = enrichment_service(store.clone(), provider);
        let sink: DynProgressSink = Arc::new(NoopProgressSink);
        let config = ContactSearchConfig::default();

        let first_job = Uuid::new_v4();
        service
            .search_contacts(
                std::slice::from_ref(&company),
                &config,
                first_job,
                false,
                &sink,
            )
            .await
            .unwrap();

        let after_first = store.contacts_for_company(company.id).await.unwrap();
        assert_eq!(after_first.len(), 2);
        let first_validated = after_first[0].last_validated;

        // Second run with identical provider output: merges, no inserts.
        let second_job = Uuid::new_v4();
        service
            .search_contacts(
                std::slice::from_ref(&company),
                &config,
                second_job,
                false,
                &sink,
            )
            .await
            .unwrap();

        let after_second = store.contacts_for_company(company.id).await.unwrap();
        assert_eq!(after_second.len(), 2);

        let ada = after_second.iter().find(|c| c.name == "Ada One").unwrap();
        assert!(ada
            .completed_searches
            .iter()
            .any(|t| t == &format!("job:{}", first_job)));
        assert!(ada
            .completed_searches
            .iter()
            .any(|t| t == &format!("job:{}", second_job)));
        assert!(ada.last_validated >= first_validated);
    }

    #[tokio::test]
    async fn test_candidate_email_never_overwritten_by_null() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let company = seed_company(&store).await;

        // First discovery carries an email, the re-run does not; the stored
        // email must survive the merge.
        let with_email = StubContactProvider::new(vec![DiscoveredContact {
            name: "Ada One".to_string(),
            role: Some("CEO".to_string()),
            email: Some("ada@acme.io".to_string()),
            probability: 90.0,
        }]);
        let service = enrichment_service(store.clone(), with_email);
        let sink: DynProgressSink = Arc::new(NoopProgressSink);
        let config = ContactSearchConfig::default();
        service
            .search_contacts(
                std::slice::from_ref(&company),
                &config,
                Uuid::new_v4(),
                false,
                &sink,
            )
            .await
            .unwrap();

        let without_email = StubContactProvider::new(vec![discovered_contact("Ada One", 70.0)]);
        let service = enrichment_service(store.clone(), without_email);
        service
            .search_contacts(
                std::slice::from_ref(&company),
                &config,
                Uuid::new_v4(),
                false,
                &sink,
            )
            .await
            .unwrap();

        let contacts = store.contacts_for_company(company.id).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email.as_deref(), Some("ada@acme.io"));
    }
}
