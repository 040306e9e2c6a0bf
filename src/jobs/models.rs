use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::enrichment::ContactSearchConfig;

/// What a search job should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchType {
    /// Company discovery only.
    Companies,
    /// Companies plus decision-maker contacts.
    Contacts,
    /// Companies, contacts, and tiered email resolution.
    Emails,
    /// Contacts/emails for companies the user already has; skips discovery.
    ContactOnly,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Companies => "companies",
            SearchType::Contacts => "contacts",
            SearchType::Emails => "emails",
            SearchType::ContactOnly => "contact-only",
        }
    }

    pub fn parse(s: &str) -> Option<SearchType> {
        match s {
            "companies" => Some(SearchType::Companies),
            "contacts" => Some(SearchType::Contacts),
            "emails" => Some(SearchType::Emails),
            "contact-only" => Some(SearchType::ContactOnly),
            _ => None,
        }
    }

    /// Whether this search type runs company discovery.
    pub fn discovers_companies(&self) -> bool {
        !matches!(self, SearchType::ContactOnly)
    }

    /// Whether this search type runs contact enrichment.
    pub fn enriches_contacts(&self) -> bool {
        matches!(
            self,
            SearchType::Contacts | SearchType::Emails | SearchType::ContactOnly
        )
    }

    /// Whether contact enrichment should also resolve emails.
    pub fn resolves_emails(&self) -> bool {
        matches!(self, SearchType::Emails | SearchType::ContactOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Where a job came from. System-sourced (cron) jobs are exempt from billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Frontend,
    Api,
    System,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Frontend => "frontend",
            JobSource::Api => "api",
            JobSource::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<JobSource> {
        match s {
            "frontend" => Some(JobSource::Frontend),
            "api" => Some(JobSource::Api),
            "system" | "cron" => Some(JobSource::System),
            _ => None,
        }
    }

    pub fn is_billable(&self) -> bool {
        !matches!(self, JobSource::System)
    }
}

/// Coarse progress snapshot, updated mid-phase through the progress sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub phase: String,
    pub completed: u32,
    pub total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobProgress {
    pub fn new(phase: &str, completed: u32, total: u32) -> Self {
        Self {
            phase: phase.to_string(),
            completed,
            total,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Default for JobProgress {
    fn default() -> Self {
        JobProgress::new("Queued", 0, 0)
    }
}

pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// A durable unit of orchestrated search/enrichment work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,

    pub query: String,
    pub search_type: SearchType,
    pub source: JobSource,
    pub status: JobStatus,
    /// Higher runs first.
    pub priority: i32,

    pub contact_search_config: Option<ContactSearchConfig>,
    pub metadata: JsonValue,

    pub progress: JobProgress,
    /// Opaque results payload (companies, contacts, counts).
    pub results: JsonValue,
    /// Number of top-level entities in `results`.
    pub result_count: i32,

    pub retry_count: i32,
    pub max_retries: i32,

    pub assigned_worker: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Fields accepted when creating a job.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub user_id: Uuid,
    pub query: String,
    pub search_type: SearchType,
    #[serde(default = "default_source")]
    pub source: JobSource,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub contact_search_config: Option<ContactSearchConfig>,
    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
    /// Overrides [`DEFAULT_MAX_RETRIES`] when set.
    #[serde(default)]
    pub max_retries: Option<i32>,
}

fn default_source() -> JobSource {
    JobSource::Api
}

fn empty_object() -> JsonValue {
    serde_json::json!({})
}

/// Summary payload written into `Job::results` on completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResults {
    pub companies: Vec<CompanySummary>,
    pub contacts_found: u32,
    pub emails_found: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanySummary {
    pub id: Uuid,
    pub name: String,
    pub website: Option<String>,
    pub contact_count: u32,
}
