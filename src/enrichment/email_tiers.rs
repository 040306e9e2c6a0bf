// src/enrichment/email_tiers.rs
//
// Tiered email-discovery fallback.
//
// Tier 1 runs the cheap primary provider across all ranked contacts in
// parallel. Tier 2 only runs when Tier 1 found nothing new, and fans two
// fallback providers out over fixed slots: provider B takes ranks {1,3},
// provider C takes ranks {1,2}, so the highest-confidence contact always
// gets two independent attempts. First writer wins per contact across
// branches, and every hit is persisted the moment it lands so partial
// progress survives a crash mid-resolution.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{Company, Contact};
use crate::providers::{DynEmailLookupProvider, EmailLookup, EmailProviderSet};
use crate::store::{ContactStore, DynStore};

use super::EMAIL_RESOLUTION_SLOTS;

/// Source tag for contacts that already held an email on entry.
pub const SOURCE_EXISTING: &str = "existing";

/// Marker unioned into `completed_searches` when every tier came up empty,
/// so future jobs can skip re-querying the contact.
pub const EXHAUSTED_TAG: &str = "email_exhausted";

/// 1-indexed rank slots each fallback provider is assigned to. Slot 1 (the
/// highest-confidence contact) appears in both subsets.
const FALLBACK_B_SLOTS: [usize; 2] = [1, 3];
const FALLBACK_C_SLOTS: [usize; 2] = [1, 2];

/// Per-contact outcome of one resolver invocation. Not persisted as its own
/// entity; merged into the contact record.
#[derive(Debug, Clone)]
pub struct EmailSearchResult {
    pub contact_id: Uuid,
    pub email: Option<String>,
    pub source: String,
    pub confidence: f32,
}

pub struct TieredEmailResolver {
    store: DynStore,
    providers: EmailProviderSet,
}

impl TieredEmailResolver {
    pub fn new(store: DynStore, providers: EmailProviderSet) -> Self {
        Self { store, providers }
    }

    /// Resolve emails for up to three ranked contacts of one company.
    /// Returns one result per input contact, in rank order.
    pub async fn resolve(&self, ranked: &[Contact], company: &Company) -> Vec<EmailSearchResult> {
        let contacts = &ranked[..ranked.len().min(EMAIL_RESOLUTION_SLOTS)];
        if contacts.is_empty() {
            return Vec::new();
        }

        // Tier 1: primary provider for every contact, in parallel.
        let mut results: Vec<EmailSearchResult> = join_all(
            contacts
                .iter()
                .map(|contact| self.tier1_lookup(contact, company)),
        )
        .await;

        // Escalation rule: emails that already existed don't count.
        let newly_found = results
            .iter()
            .filter(|r| r.email.is_some() && r.source != SOURCE_EXISTING)
            .count();

        if newly_found == 0 {
            info!(
                "tier 1 found no emails for company {} ({} contacts); escalating to tier 2",
                company.id,
                contacts.len()
            );
            self.run_tier2(contacts, company, &mut results).await;
        }

        // Contacts that exit every tier email-less get the exhausted marker.
        for result in &results {
            if result.email.is_none() {
                if let Err(e) = self
                    .store
                    .mark_contact_searched(result.contact_id, EXHAUSTED_TAG)
                    .await
                {
                    warn!(
                        "failed to tag contact {} as exhausted: {:?}",
                        result.contact_id, e
                    );
                }
            }
        }

        results
    }

    async fn tier1_lookup(&self, contact: &Contact, company: &Company) -> EmailSearchResult {
        // A contact that already has a usable email is short-circuited; it
        // never costs a provider call and never counts toward escalation.
        if contact.has_valid_email() {
            return EmailSearchResult {
                contact_id: contact.id,
                email: contact.email.clone(),
                source: SOURCE_EXISTING.to_string(),
                confidence: 100.0,
            };
        }

        let provider = &self.providers.primary;
        match provider.find_email(contact, company).await {
            Ok(EmailLookup {
                email: Some(email),
                confidence,
            }) => {
                self.persist_email(contact.id, &email, provider.name(), confidence)
                    .await;
                EmailSearchResult {
                    contact_id: contact.id,
                    email: Some(email),
                    source: provider.name().to_string(),
                    confidence,
                }
            }
            Ok(_) => EmailSearchResult {
                contact_id: contact.id,
                email: None,
                source: provider.name().to_string(),
                confidence: 0.0,
            },
            Err(e) => {
                // Degrades to "no email" for this contact; siblings keep going.
                warn!(
                    "tier 1 lookup failed for contact {} ({}): {}",
                    contact.id, contact.name, e
                );
                EmailSearchResult {
                    contact_id: contact.id,
                    email: None,
                    source: provider.name().to_string(),
                    confidence: 0.0,
                }
            }
        }
    }

    async fn run_tier2(
        &self,
        contacts: &[Contact],
        company: &Company,
        results: &mut [EmailSearchResult],
    ) {
        // Shared winner map; pre-seeded with contacts that entered holding
        // an email so no fallback wastes a call on them.
        let mut seeded: HashMap<Uuid, EmailSearchResult> = HashMap::new();
        for result in results.iter() {
            if result.email.is_some() {
                seeded.insert(result.contact_id, result.clone());
            }
        }
        let found = Arc::new(Mutex::new(seeded));

        let mut calls: Vec<(DynEmailLookupProvider, usize)> = Vec::new();
        for slot in FALLBACK_B_SLOTS {
            if slot <= contacts.len() {
                calls.push((self.providers.fallback_b.clone(), slot));
            }
        }
        for slot in FALLBACK_C_SLOTS {
            if slot <= contacts.len() {
                calls.push((self.providers.fallback_c.clone(), slot));
            }
        }

        join_all(calls.into_iter().map(|(provider, slot)| {
            let contact = contacts[slot - 1].clone();
            let found = found.clone();
            async move {
                self.tier2_lookup(provider, &contact, company, &found).await;
            }
        }))
        .await;

        // Later-arriving results for a contact that already has an email were
        // discarded inside tier2_lookup; fill the still-empty slots.
        let found = found.lock().await;
        for result in results.iter_mut() {
            if result.email.is_none() {
                if let Some(winner) = found.get(&result.contact_id) {
                    *result = winner.clone();
                }
            }
        }
    }

    async fn tier2_lookup(
        &self,
        provider: DynEmailLookupProvider,
        contact: &Contact,
        company: &Company,
        found: &Mutex<HashMap<Uuid, EmailSearchResult>>,
    ) {
        // Skip contacts that already acquired an email earlier in this
        // invocation, whether from tier 1 or a faster-completing sibling.
        if found.lock().await.contains_key(&contact.id) {
            return;
        }

        match provider.find_email(contact, company).await {
            Ok(EmailLookup {
                email: Some(email),
                confidence,
            }) => {
                let won = {
                    let mut found = found.lock().await;
                    if found.contains_key(&contact.id) {
                        false
                    } else {
                        found.insert(
                            contact.id,
                            EmailSearchResult {
                                contact_id: contact.id,
                                email: Some(email.clone()),
                                source: provider.name().to_string(),
                                confidence,
                            },
                        );
                        true
                    }
                };

                if won {
                    self.persist_email(contact.id, &email, provider.name(), confidence)
                        .await;
                } else {
                    info!(
                        "discarding late {} result for contact {} (already resolved)",
                        provider.name(),
                        contact.id
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "tier 2 lookup ({}) failed for contact {} ({}): {}",
                    provider.name(),
                    contact.id,
                    contact.name,
                    e
                );
            }
        }
    }

    /// Persist a hit immediately; the conditional write keeps the first
    /// writer's value if another branch got there in between.
    async fn persist_email(&self, contact_id: Uuid, email: &str, source: &str, confidence: f32) {
        match self
            .store
            .set_contact_email_if_absent(contact_id, email, source, confidence)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    "contact {} already had an email; keeping the stored value",
                    contact_id
                );
            }
            Err(e) => {
                warn!("failed to persist email for contact {}: {:?}", contact_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::time::{sleep, Duration};

    use crate::providers::{EmailLookupProvider, ProviderError};
    use crate::store::memory::MemoryStore;
    use crate::store::{ContactStore, DynStore};

    /// Scripted provider: answers from a name -> email map, counts calls,
    /// records who was queried, and simulates network latency so sibling
    /// calls all launch before the first one lands.
    struct MockProvider {
        name: &'static str,
        answers: HashMap<String, String>,
        delay: Duration,
        fail: bool,
        calls: AtomicUsize,
        queried: StdMutex<Vec<String>>,
    }

    impl MockProvider {
        fn new(name: &'static str, answers: &[(&str, &str)], delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                answers: answers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                delay: Duration::from_millis(delay_ms),
                fail: false,
                calls: AtomicUsize::new(0),
                queried: StdMutex::new(Vec::new()),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                answers: HashMap::new(),
                delay: Duration::from_millis(1),
                fail: true,
                calls: AtomicUsize::new(0),
                queried: StdMutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn queried_names(&self) -> Vec<String> {
            self.queried.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailLookupProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn find_email(
            &self,
            contact: &Contact,
            _company: &Company,
        ) -> Result<EmailLookup, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queried.lock().unwrap().push(contact.name.clone());
            sleep(self.delay).await;

            if self.fail {
                return Err(ProviderError::Api {
                    provider: self.name,
                    status: 500,
                    body: "mock outage".to_string(),
                });
            }

            Ok(match self.answers.get(&contact.name) {
                Some(email) => EmailLookup {
                    email: Some(email.clone()),
                    confidence: 80.0,
                },
                None => EmailLookup::default(),
            })
        }
    }

    fn contact(company_id: Uuid, name: &str, probability: f32, email: Option<&str>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            company_id,
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

    fn company() -> Company {
        Company {
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
        }
    }

    async fn seed_contacts(store: &DynStore, contacts: &[Contact]) -> Vec<Contact> {
        let mut seeded = Vec::new();
        for c in contacts {
            let inserted = store
                .insert_contact(crate::db::models::NewContact {
                    company_id: c.company_id,
                    name: c.name.clone(),
                    role: c.role.clone(),
                    email: c.email.clone(),
                    email_source: c.email_source.clone(),
                    probability: c.probability,
                    completed_searches: c.completed_searches.clone(),
                })
                .await
                .unwrap();
            seeded.push(inserted);
        }
        seeded
    }

    fn resolver(
        store: DynStore,
        primary: Arc<MockProvider>,
        fallback_b: Arc<MockProvider>,
        fallback_c: Arc<MockProvider>,
    ) -> TieredEmailResolver {
        TieredEmailResolver::new(
            store,
            EmailProviderSet {
                primary,
                fallback_b,
                fallback_c,
            },
        )
    }

    #[tokio::test]
    async fn test_tier2_skipped_when_tier1_finds_one() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let comp = company();
        let contacts = seed_contacts(
            &store,
            &[
                contact(comp.id, "Ada One", 90.0, None),
                contact(comp.id, "Bob Two", 60.0, None),
                contact(comp.id, "Cal Three", 30.0, None),
            ],
        )
        .await;

        let primary = MockProvider::new("mock_primary", &[("Ada One", "ada@acme.io")], 1);
        let b = MockProvider::new("mock_b", &[], 1);
        let c = MockProvider::new("mock_c", &[], 1);
        let resolver = resolver(store.clone(), primary.clone(), b.clone(), c.clone());

        let results = resolver.resolve(&contacts, &comp).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].email.as_deref(), Some("ada@acme.io"));
        assert_eq!(results[0].source, "mock_primary");
        assert!(results[1].email.is_none());
        assert!(results[2].email.is_none());

        assert_eq!(primary.call_count(), 3);
        assert_eq!(b.call_count(), 0);
        assert_eq!(c.call_count(), 0);
    }

    #[tokio::test]
    async fn test_tier2_fixed_slot_assignment() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let comp = company();
        let contacts = seed_contacts(
            &store,
            &[
                contact(comp.id, "Ada One", 90.0, None),
                contact(comp.id, "Bob Two", 60.0, None),
                contact(comp.id, "Cal Three", 30.0, None),
            ],
        )
        .await;

        let primary = MockProvider::new("mock_primary", &[], 1);
        // B answers both of its slots; B is faster than C so B wins slot 1.
        let b = MockProvider::new(
            "mock_b",
            &[("Ada One", "ada@acme.io"), ("Cal Three", "cal@acme.io")],
            5,
        );
        let c = MockProvider::new(
            "mock_c",
            &[("Ada One", "ada.other@acme.io"), ("Bob Two", "bob@acme.io")],
            30,
        );
        let resolver = resolver(store.clone(), primary.clone(), b.clone(), c.clone());

        let results = resolver.resolve(&contacts, &comp).await;

        // Exactly four fallback calls: B x {1,3}, C x {1,2}.
        assert_eq!(b.call_count(), 2);
        assert_eq!(c.call_count(), 2);
        assert_eq!(b.queried_names(), vec!["Ada One", "Cal Three"]);
        assert_eq!(c.queried_names(), vec!["Ada One", "Bob Two"]);

        // First writer wins for slot 1: the faster provider's value sticks.
        assert_eq!(results[0].email.as_deref(), Some("ada@acme.io"));
        assert_eq!(results[0].source, "mock_b");
        assert_eq!(results[1].email.as_deref(), Some("bob@acme.io"));
        assert_eq!(results[1].source, "mock_c");
        assert_eq!(results[2].email.as_deref(), Some("cal@acme.io"));
        assert_eq!(results[2].source, "mock_b");

        // Stored contact matches the winning value, not the late arrival.
        let stored = store.contacts_for_company(contacts[0].company_id).await;
        let ada = stored
            .unwrap()
            .into_iter()
            .find(|c| c.name == "Ada One")
            .unwrap();
        assert_eq!(ada.email.as_deref(), Some("ada@acme.io"));
    }

    #[tokio::test]
    async fn test_existing_email_short_circuits_and_is_skipped_by_tier2() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let comp = company();
        let contacts = seed_contacts(
            &store,
            &[
                contact(comp.id, "Ada One", 90.0, Some("ada@acme.io")),
                contact(comp.id, "Bob Two", 60.0, None),
                contact(comp.id, "Cal Three", 30.0, None),
            ],
        )
        .await;

        let primary = MockProvider::new("mock_primary", &[], 1);
        let b = MockProvider::new("mock_b", &[], 1);
        let c = MockProvider::new("mock_c", &[], 1);
        let resolver = resolver(store.clone(), primary.clone(), b.clone(), c.clone());

        let results = resolver.resolve(&contacts, &comp).await;

        // The existing email is reported but never costs a primary call.
        assert_eq!(results[0].source, SOURCE_EXISTING);
        assert_eq!(results[0].confidence, 100.0);
        assert_eq!(primary.call_count(), 2);

        // Existing emails don't count as "found", so tier 2 still runs, but
        // slot 1 is skipped in both fallback subsets: B covers slot 3 only,
        // C covers slot 2 only.
        assert_eq!(b.call_count(), 1);
        assert_eq!(c.call_count(), 1);
        assert_eq!(b.queried_names(), vec!["Cal Three"]);
        assert_eq!(c.queried_names(), vec!["Bob Two"]);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_no_email() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let comp = company();
        let contacts = seed_contacts(
            &store,
            &[contact(comp.id, "Ada One", 90.0, None), contact(comp.id, "Bob Two", 60.0, None)],
        )
        .await;

        let primary = MockProvider::failing("mock_primary");
        let b = MockProvider::new("mock_b", &[("Ada One", "ada@acme.io")], 1);
        let c = MockProvider::failing("mock_c");
        let resolver = resolver(store.clone(), primary.clone(), b.clone(), c.clone());

        let results = resolver.resolve(&contacts, &comp).await;

        // Primary outage hit both contacts, tier 2 escalated, and the one
        // fallback that works still produced a result.
        assert_eq!(primary.call_count(), 2);
        assert_eq!(results[0].email.as_deref(), Some("ada@acme.io"));
        assert!(results[1].email.is_none());
    }

    #[tokio::test]
    async fn test_unresolved_contacts_tagged_exhausted() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let comp = company();
        let contacts = seed_contacts(
            &store,
            &[contact(comp.id, "Ada One", 90.0, None), contact(comp.id, "Bob Two", 60.0, None)],
        )
        .await;

        let primary = MockProvider::new("mock_primary", &[("Ada One", "ada@acme.io")], 1);
        let b = MockProvider::new("mock_b", &[], 1);
        let c = MockProvider::new("mock_c", &[], 1);
        let resolver = resolver(store.clone(), primary.clone(), b.clone(), c.clone());

        resolver.resolve(&contacts, &comp).await;

        let stored = store
            .contacts_for_company(contacts[0].company_id)
            .await
            .unwrap();
        let ada = stored.iter().find(|c| c.name == "Ada One").unwrap();
        let bob = stored.iter().find(|c| c.name == "Bob Two").unwrap();

        assert!(!ada.completed_searches.iter().any(|t| t == EXHAUSTED_TAG));
        assert!(bob.completed_searches.iter().any(|t| t == EXHAUSTED_TAG));
    }

    #[tokio::test]
    async fn test_tier1_hit_is_persisted_immediately() {
        let store: DynStore = Arc::new(MemoryStore::new());
        let comp = company();
        let contacts =
            seed_contacts(&store, &[contact(comp.id, "Ada One", 90.0, None)]).await;

        let primary = MockProvider::new("mock_primary", &[("Ada One", "ada@acme.io")], 1);
        let b = MockProvider::new("mock_b", &[], 1);
        let c = MockProvider::new("mock_c", &[], 1);
        let resolver = resolver(store.clone(), primary, b, c);

        resolver.resolve(&contacts, &comp).await;

        let stored = store
            .contacts_for_company(contacts[0].company_id)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(stored.email.as_deref(), Some("ada@acme.io"));
        assert_eq!(stored.email_source.as_deref(), Some("mock_primary"));
        assert!(stored.last_validated.is_some());
    }
}
