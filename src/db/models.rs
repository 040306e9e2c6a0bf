use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A business entity discovered for a search query.
///
/// Companies are owned by the user who ran the search and are created fresh
/// on every job execution; overlapping queries produce separate rows
/// (snapshot-per-search, see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub user_id: Uuid,

    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,

    /// Job execution that created this row.
    pub source_job_id: Option<Uuid>,
    /// Optional user list the company was saved into.
    pub list_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a new company.
#[derive(Debug, Clone)]
pub struct NewCompany {
    pub user_id: Uuid,
    pub name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub source_job_id: Option<Uuid>,
    pub list_id: Option<Uuid>,
}

/// A person associated with a company.
///
/// Unique per (company_id, email) once the email is known, otherwise per
/// (company_id, normalized name). `completed_searches` carries job/provider
/// tags already attempted so future jobs can skip re-querying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub company_id: Uuid,

    pub name: String,
    pub role: Option<String>,
    pub email: Option<String>,
    /// Provider that produced the email ("hunter", "prospeo", ...).
    pub email_source: Option<String>,
    /// Confidence score 0.0-100.0
    pub probability: f32,

    pub completed_searches: Vec<String>,
    pub last_validated: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a new contact.
#[derive(Debug, Clone)]
pub struct NewContact {
    pub company_id: Uuid,
    pub name: String,
    pub role: Option<String>,
    pub email: Option<String>,
    pub email_source: Option<String>,
    pub probability: f32,
    pub completed_searches: Vec<String>,
}

impl Contact {
    /// True when the contact holds something that looks like a usable email.
    pub fn has_valid_email(&self) -> bool {
        self.email
            .as_deref()
            .map(|e| e.contains('@') && !e.trim().is_empty())
            .unwrap_or(false)
    }
}
