// src/store/postgres.rs
//
// sqlx/Postgres adapter for the store traits.
//
// Status transitions are conditional UPDATEs (`WHERE status = ...`) so a
// lost race shows up as zero rows instead of a clobbered record. The dequeue
// path uses FOR UPDATE SKIP LOCKED so a second process scanning the same
// table cannot pick the same row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::models::{Company, Contact, NewCompany, NewContact};
use crate::db::DbPool;
use crate::enrichment::ContactSearchConfig;
use crate::jobs::models::{
    Job, JobProgress, JobSource, JobStatus, NewJob, SearchType, DEFAULT_MAX_RETRIES,
};
use crate::store::{CompanyStore, ContactStore, JobStore, StoreError};

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = r#"
    id, user_id, query, search_type, source, status, priority,
    contact_search_config, metadata, progress, results, result_count,
    retry_count, max_retries, assigned_worker,
    started_at, completed_at, error, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    user_id: Uuid,
    query: String,
    search_type: String,
    source: String,
    status: String,
    priority: i32,
    contact_search_config: Option<JsonValue>,
    metadata: JsonValue,
    progress: JsonValue,
    results: Option<JsonValue>,
    result_count: i32,
    retry_count: i32,
    max_retries: i32,
    assigned_worker: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    /// Map string columns into the typed enums at the edge.
    fn into_job(self) -> Result<Job, StoreError> {
        let search_type = SearchType::parse(&self.search_type)
            .ok_or_else(|| StoreError::Corrupt(format!("search_type '{}'", self.search_type)))?;
        let source = JobSource::parse(&self.source)
            .ok_or_else(|| StoreError::Corrupt(format!("source '{}'", self.source)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("status '{}'", self.status)))?;

        let progress: JobProgress = serde_json::from_value(self.progress)
            .map_err(|e| StoreError::Corrupt(format!("progress payload: {}", e)))?;

        let contact_search_config: Option<ContactSearchConfig> = match self.contact_search_config {
            Some(v) => serde_json::from_value(v)
                .map_err(|e| StoreError::Corrupt(format!("contact_search_config: {}", e)))?,
            None => None,
        };

        Ok(Job {
            id: self.id,
            user_id: self.user_id,
            query: self.query,
            search_type,
            source,
            status,
            priority: self.priority,
            contact_search_config,
            metadata: self.metadata,
            progress,
            results: self.results.unwrap_or(JsonValue::Null),
            result_count: self.result_count,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            assigned_worker: self.assigned_worker,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CompanyRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    website: Option<String>,
    industry: Option<String>,
    location: Option<String>,
    description: Option<String>,
    source_job_id: Option<Uuid>,
    list_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CompanyRow> for Company {
    fn from(r: CompanyRow) -> Self {
        Company {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            website: r.website,
            industry: r.industry,
            location: r.location,
            description: r.description,
            source_job_id: r.source_job_id,
            list_id: r.list_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ContactRow {
    id: Uuid,
    company_id: Uuid,
    name: String,
    role: Option<String>,
    email: Option<String>,
    email_source: Option<String>,
    probability: f32,
    completed_searches: Vec<String>,
    last_validated: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ContactRow> for Contact {
    fn from(r: ContactRow) -> Self {
        Contact {
            id: r.id,
            company_id: r.company_id,
            name: r.name,
            role: r.role,
            email: r.email,
            email_source: r.email_source,
            probability: r.probability,
            completed_searches: r.completed_searches,
            last_validated: r.last_validated,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let progress = serde_json::to_value(JobProgress::default())
            .map_err(|e| StoreError::Corrupt(format!("progress payload: {}", e)))?;
        let config = match &new.contact_search_config {
            Some(c) => Some(
                serde_json::to_value(c)
                    .map_err(|e| StoreError::Corrupt(format!("contact_search_config: {}", e)))?,
            ),
            None => None,
        };

        let sql = format!(
            r#"
            INSERT INTO jobs (
                user_id, query, search_type, source, status, priority,
                contact_search_config, metadata, progress, max_retries
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(new.user_id)
            .bind(&new.query)
            .bind(new.search_type.as_str())
            .bind(new.source.as_str())
            .bind(JobStatus::Pending.as_str())
            .bind(new.priority)
            .bind(config)
            .bind(&new.metadata)
            .bind(progress)
            .bind(new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))
            .fetch_one(&self.pool)
            .await?;

        row.into_job()
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn list_jobs(&self, user_id: Uuid, limit: i64) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn claim_pending(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = $3,
                assigned_worker = $2,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = $4
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .bind(worker_id)
            .bind(JobStatus::Processing.as_str())
            .bind(JobStatus::Pending.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn next_pending_job(&self) -> Result<Option<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = $1
            ORDER BY priority DESC, created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(JobStatus::Pending.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        progress: &JobProgress,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_value(progress)
            .map_err(|e| StoreError::Corrupt(format!("progress payload: {}", e)))?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        results: &JsonValue,
        result_count: i32,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                results = $3,
                result_count = $4,
                error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Completed.as_str())
        .bind(results)
        .bind(result_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                retry_count = retry_count + 1,
                error = $3,
                assigned_worker = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Pending.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                error = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_pending_job(&self, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                error = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn retry_failed_job(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                retry_count = retry_count + 1,
                error = NULL,
                completed_at = NULL,
                assigned_worker = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = $3 AND retry_count < max_retries
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_stuck_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                assigned_worker = NULL,
                updated_at = NOW()
            WHERE status = $1
              AND (started_at IS NULL OR started_at < $3)
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Pending.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ($1, $2)
              AND completed_at IS NOT NULL
              AND completed_at < $3
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn failed_jobs_for_retry(&self) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE status = $1 AND retry_count < max_retries
            ORDER BY created_at
            "#
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(JobStatus::Failed.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

#[async_trait]
impl CompanyStore for PgStore {
    async fn insert_company(&self, new: NewCompany) -> Result<Company, StoreError> {
        let row = sqlx::query_as::<_, CompanyRow>(
            r#"
            INSERT INTO companies (
                user_id, name, website, industry, location, description,
                source_job_id, list_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING
                id, user_id, name, website, industry, location, description,
                source_job_id, list_id, created_at, updated_at
            "#,
        )
        .bind(new.user_id)
        .bind(&new.name)
        .bind(&new.website)
        .bind(&new.industry)
        .bind(&new.location)
        .bind(&new.description)
        .bind(new.source_job_id)
        .bind(new.list_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn companies_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Company>, StoreError> {
        let rows = sqlx::query_as::<_, CompanyRow>(
            r#"
            SELECT
                id, user_id, name, website, industry, location, description,
                source_job_id, list_id, created_at, updated_at
            FROM companies
            WHERE id = ANY($1)
            ORDER BY created_at
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Company::from).collect())
    }

    async fn companies_for_user(&self, user_id: Uuid) -> Result<Vec<Company>, StoreError> {
        let rows = sqlx::query_as::<_, CompanyRow>(
            r#"
            SELECT
                id, user_id, name, website, industry, location, description,
                source_job_id, list_id, created_at, updated_at
            FROM companies
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Company::from).collect())
    }
}

#[async_trait]
impl ContactStore for PgStore {
    async fn contacts_for_company(&self, company_id: Uuid) -> Result<Vec<Contact>, StoreError> {
        let rows = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT
                id, company_id, name, role, email, email_source, probability,
                completed_searches, last_validated, created_at, updated_at
            FROM contacts
            WHERE company_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Contact::from).collect())
    }

    async fn insert_contact(&self, new: NewContact) -> Result<Contact, StoreError> {
        let row = sqlx::query_as::<_, ContactRow>(
            r#"
            INSERT INTO contacts (
                company_id, name, role, email, email_source, probability,
                completed_searches
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
                id, company_id, name, role, email, email_source, probability,
                completed_searches, last_validated, created_at, updated_at
            "#,
        )
        .bind(new.company_id)
        .bind(&new.name)
        .bind(&new.role)
        .bind(&new.email)
        .bind(&new.email_source)
        .bind(new.probability)
        .bind(&new.completed_searches)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        // COALESCE keeps a stored non-null value when the merge carries None.
        sqlx::query(
            r#"
            UPDATE contacts
            SET name = $2,
                role = COALESCE($3, role),
                email = COALESCE($4, email),
                email_source = COALESCE($5, email_source),
                probability = $6,
                completed_searches = (
                    SELECT ARRAY(
                        SELECT DISTINCT t
                        FROM unnest(completed_searches || $7::text[]) AS t
                    )
                ),
                last_validated = COALESCE($8, last_validated),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(contact.id)
        .bind(&contact.name)
        .bind(&contact.role)
        .bind(&contact.email)
        .bind(&contact.email_source)
        .bind(contact.probability)
        .bind(&contact.completed_searches)
        .bind(contact.last_validated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_contact_email_if_absent(
        &self,
        contact_id: Uuid,
        email: &str,
        source: &str,
        confidence: f32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET email = $2,
                email_source = $3,
                probability = $4,
                last_validated = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND email IS NULL
            "#,
        )
        .bind(contact_id)
        .bind(email)
        .bind(source)
        .bind(confidence)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_contact_searched(&self, contact_id: Uuid, tag: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE contacts
            SET completed_searches = (
                    SELECT ARRAY(
                        SELECT DISTINCT t
                        FROM unnest(completed_searches || $2::text) AS t
                    )
                ),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(contact_id)
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
