// src/testutil.rs
//
// Stub collaborators shared by the job service and processor tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::billing::{BillingAction, BillingClient, BillingError, BillingOutcome};
use crate::db::models::{Company, Contact};
use crate::providers::{
    CompanySearchProvider, ContactSearchProvider, ContactSearchRequest, DiscoveredCompany,
    DiscoveredContact, EmailLookup, EmailLookupProvider, EmailProviderSet, ProviderError,
};

/// Company-discovery stub: optionally fails its first N calls, then returns
/// a fixed company list.
pub struct StubCompanyProvider {
    companies: Vec<DiscoveredCompany>,
    fail_first: usize,
    calls: AtomicUsize,
}

impl StubCompanyProvider {
    pub fn new(companies: Vec<DiscoveredCompany>) -> Arc<Self> {
        Arc::new(Self {
            companies,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing_first(companies: Vec<DiscoveredCompany>, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            companies,
            fail_first,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompanySearchProvider for StubCompanyProvider {
    async fn search_companies(
        &self,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<DiscoveredCompany>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ProviderError::Api {
                provider: "stub_companies",
                status: 503,
                body: "stubbed outage".to_string(),
            });
        }
        Ok(self.companies.clone())
    }
}

/// Contact-discovery stub: same candidate list for every company.
pub struct StubContactProvider {
    contacts: Vec<DiscoveredContact>,
    calls: AtomicUsize,
}

impl StubContactProvider {
    pub fn new(contacts: Vec<DiscoveredContact>) -> Arc<Self> {
        Arc::new(Self {
            contacts,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContactSearchProvider for StubContactProvider {
    async fn search_contacts(
        &self,
        _req: &ContactSearchRequest,
    ) -> Result<Vec<DiscoveredContact>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.contacts.clone())
    }
}

/// Email-lookup stub answering from a contact-name -> email map.
pub struct StubEmailProvider {
    name: &'static str,
    answers: HashMap<String, String>,
    calls: AtomicUsize,
}

impl StubEmailProvider {
    pub fn new(name: &'static str, answers: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            name,
            answers: answers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailLookupProvider for StubEmailProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn find_email(
        &self,
        contact: &Contact,
        _company: &Company,
    ) -> Result<EmailLookup, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.answers.get(&contact.name) {
            Some(email) => EmailLookup {
                email: Some(email.clone()),
                confidence: 85.0,
            },
            None => EmailLookup::default(),
        })
    }
}

pub fn email_set(
    primary: Arc<StubEmailProvider>,
    fallback_b: Arc<StubEmailProvider>,
    fallback_c: Arc<StubEmailProvider>,
) -> EmailProviderSet {
    EmailProviderSet {
        primary,
        fallback_b,
        fallback_c,
    }
}

/// Billing stub that approves everything and records each deduction.
pub struct RecordingBillingClient {
    deductions: Mutex<Vec<(Uuid, BillingAction)>>,
}

impl RecordingBillingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            deductions: Mutex::new(Vec::new()),
        })
    }

    pub fn deductions(&self) -> Vec<(Uuid, BillingAction)> {
        self.deductions.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingClient for RecordingBillingClient {
    async fn deduct(
        &self,
        user_id: Uuid,
        action: BillingAction,
    ) -> Result<BillingOutcome, BillingError> {
        self.deductions.lock().unwrap().push((user_id, action));
        Ok(BillingOutcome {
            success: true,
            new_balance: 100,
        })
    }
}

pub fn discovered_company(name: &str, website: &str) -> DiscoveredCompany {
    DiscoveredCompany {
        name: name.to_string(),
        website: Some(website.to_string()),
        industry: None,
        location: None,
        description: None,
    }
}

pub fn discovered_contact(name: &str, probability: f32) -> DiscoveredContact {
    DiscoveredContact {
        name: name.to_string(),
        role: Some("Founder".to_string()),
        email: None,
        probability,
    }
}
