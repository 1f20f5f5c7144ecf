//! SQLite database operations
//!
//! All database access goes through this module. The job queue tables are
//! the only shared mutable resource in the system; all coordination is
//! expressed as atomic conditional updates on the job status column.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

/// Fixed-width RFC 3339 UTC encoding for timestamp columns.
///
/// Always millisecond precision with a trailing "Z", so lexicographic
/// comparison in SQL (the claim query's eligibility check) orders
/// chronologically.
fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn opt_ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(ts)
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            tracing::error!("Migration failed: {}", e);
            AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
        })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Job store
    // =========================================================================

    /// Enqueue a job.
    ///
    /// The payload is opaque serialized data; no shape validation happens
    /// here. The row is inserted with status=pending.
    pub async fn enqueue_job(&self, job: &Job) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, domain, status, payload, retry_count, max_retries,
                last_error, created_at, scheduled_for, started_at, completed_at,
                created_by, notes
            )
            VALUES (?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.job_type)
        .bind(&job.domain)
        .bind(&job.payload)
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(&job.last_error)
        .bind(ts(job.created_at))
        .bind(ts(job.scheduled_for))
        .bind(opt_ts(job.started_at))
        .bind(opt_ts(job.completed_at))
        .bind(&job.created_by)
        .bind(&job.notes)
        .execute(&self.pool)
        .await?;

        crate::metrics::JOBS_ENQUEUED_TOTAL
            .with_label_values(&[&job.job_type])
            .inc();

        tracing::debug!(job_id = %job.id, job_type = %job.job_type, domain = %job.domain, "Job enqueued");
        Ok(())
    }

    /// Atomically claim the oldest eligible pending job for a domain.
    ///
    /// Selection and the pending->processing transition happen in a single
    /// conditional UPDATE; a lost race affects zero rows and returns None
    /// rather than retrying internally. This is the one synchronization
    /// point guaranteeing at-most-one-claimant.
    ///
    /// Jobs with a future `scheduled_for` are invisible.
    pub async fn claim_next_job(&self, domain: &str) -> Result<Option<Job>, AppError> {
        let now = ts(Utc::now());

        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'processing', started_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE domain = ?2 AND status = 'pending' AND scheduled_for <= ?1
                ORDER BY scheduled_for ASC, id ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(&now)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Mark a job completed.
    ///
    /// Idempotent: calling it on an already-terminal job is a no-op.
    pub async fn complete_job(&self, job_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = ?1
            WHERE id = ?2 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(ts(Utc::now()))
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a job failure.
    ///
    /// Retryable failures below the retry ceiling are rescheduled with
    /// exponential backoff (2^retry_count minutes) and returned to pending;
    /// everything else becomes a terminal failure. Either way the audit log
    /// gets an entry, so operators can tell "retried twice then gave up"
    /// from "failed instantly".
    pub async fn fail_job(
        &self,
        job_id: &str,
        error: &str,
        can_retry: bool,
    ) -> Result<(), AppError> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::Database(sqlx::Error::RowNotFound))?;

        let now = Utc::now();

        if can_retry && job.retry_count < job.max_retries {
            let delay_minutes = 2i64.saturating_pow(job.retry_count.min(30) as u32);
            let scheduled_for = now + Duration::minutes(delay_minutes);

            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending', retry_count = retry_count + 1,
                    last_error = ?1, scheduled_for = ?2, started_at = NULL
                WHERE id = ?3
                "#,
            )
            .bind(error)
            .bind(ts(scheduled_for))
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            self.append_job_log(
                job_id,
                &format!(
                    "retry {}/{} scheduled for {} after error: {}",
                    job.retry_count + 1,
                    job.max_retries,
                    ts(scheduled_for),
                    error
                ),
            )
            .await?;

            tracing::warn!(
                job_id = %job_id,
                retry = job.retry_count + 1,
                delay_minutes,
                error = %error,
                "Job rescheduled for retry"
            );
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed', last_error = ?1, completed_at = ?2
                WHERE id = ?3
                "#,
            )
            .bind(error)
            .bind(ts(now))
            .bind(job_id)
            .execute(&self.pool)
            .await?;

            self.append_job_log(job_id, &format!("permanently failed: {}", error))
                .await?;

            tracing::error!(job_id = %job_id, error = %error, "Job permanently failed");
        }

        Ok(())
    }

    /// Append a line to a job's audit log, independent of job status.
    pub async fn append_job_log(&self, job_id: &str, message: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO job_logs (job_id, message, created_at) VALUES (?, ?, ?)")
            .bind(job_id)
            .bind(message)
            .bind(ts(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, AppError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn get_job_logs(&self, job_id: &str) -> Result<Vec<JobLogEntry>, AppError> {
        let logs = sqlx::query_as::<_, JobLogEntry>(
            "SELECT * FROM job_logs WHERE job_id = ? ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Read-only job counts per (domain, status) for operational visibility.
    pub async fn job_status_counts(&self) -> Result<Vec<(String, String, i64)>, AppError> {
        let counts = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT domain, status, COUNT(*) FROM jobs GROUP BY domain, status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(counts)
    }

    // =========================================================================
    // Local actors
    // =========================================================================

    /// Insert a local actor unless one already exists for (username, domain).
    ///
    /// Returns true if the row was inserted.
    pub async fn insert_actor_if_absent(&self, actor: &LocalActor) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO actors (
                id, username, domain, display_name, summary,
                private_key_pem, public_key_pem, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (username, domain) DO NOTHING
            "#,
        )
        .bind(&actor.id)
        .bind(&actor.username)
        .bind(&actor.domain)
        .bind(&actor.display_name)
        .bind(&actor.summary)
        .bind(&actor.private_key_pem)
        .bind(&actor.public_key_pem)
        .bind(ts(actor.created_at))
        .bind(ts(actor.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_actor(
        &self,
        domain: &str,
        username: &str,
    ) -> Result<Option<LocalActor>, AppError> {
        let actor = sqlx::query_as::<_, LocalActor>(
            "SELECT * FROM actors WHERE domain = ? AND username = ?",
        )
        .bind(domain)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(actor)
    }

    pub async fn get_actor_by_id(&self, id: &str) -> Result<Option<LocalActor>, AppError> {
        let actor = sqlx::query_as::<_, LocalActor>("SELECT * FROM actors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(actor)
    }

    // =========================================================================
    // Badges
    // =========================================================================

    pub async fn insert_badge(&self, badge: &Badge) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO badges (id, actor_id, domain, title, description, criteria, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&badge.id)
        .bind(&badge.actor_id)
        .bind(&badge.domain)
        .bind(&badge.title)
        .bind(&badge.description)
        .bind(&badge.criteria)
        .bind(ts(badge.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_badge(&self, id: &str) -> Result<Option<Badge>, AppError> {
        let badge = sqlx::query_as::<_, Badge>("SELECT * FROM badges WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(badge)
    }

    // =========================================================================
    // Badge grants
    // =========================================================================

    pub async fn insert_grant(&self, grant: &BadgeGrant) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO badge_grants (
                id, badge_id, title, description, criteria, issued_by,
                recipient_uri, recipient_name, recipient_email, issued_at,
                accepted_at, boosted_at, revoked_at, accept_key, fingerprint,
                note_id, is_external, is_public
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&grant.id)
        .bind(&grant.badge_id)
        .bind(&grant.title)
        .bind(&grant.description)
        .bind(&grant.criteria)
        .bind(&grant.issued_by)
        .bind(&grant.recipient_uri)
        .bind(&grant.recipient_name)
        .bind(&grant.recipient_email)
        .bind(ts(grant.issued_at))
        .bind(opt_ts(grant.accepted_at))
        .bind(opt_ts(grant.boosted_at))
        .bind(opt_ts(grant.revoked_at))
        .bind(&grant.accept_key)
        .bind(&grant.fingerprint)
        .bind(&grant.note_id)
        .bind(grant.is_external)
        .bind(grant.is_public)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_grant(&self, id: &str) -> Result<Option<BadgeGrant>, AppError> {
        let grant = sqlx::query_as::<_, BadgeGrant>("SELECT * FROM badge_grants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(grant)
    }

    pub async fn get_grant_by_note_id(
        &self,
        note_id: &str,
    ) -> Result<Option<BadgeGrant>, AppError> {
        let grant =
            sqlx::query_as::<_, BadgeGrant>("SELECT * FROM badge_grants WHERE note_id = ?")
                .bind(note_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(grant)
    }

    /// Accept a grant: clear the one-time key and stamp accepted_at.
    ///
    /// Conditional on the key matching and the grant not being revoked.
    /// Returns true if the transition happened.
    pub async fn accept_grant(&self, id: &str, accept_key: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE badge_grants
            SET accept_key = NULL, accepted_at = ?1
            WHERE id = ?2 AND accept_key = ?3 AND revoked_at IS NULL
            "#,
        )
        .bind(ts(Utc::now()))
        .bind(id)
        .bind(accept_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Seal a grant: assign fingerprint and canonical note id.
    ///
    /// Conditional on the awaiting-seal state: accepted, key cleared, no
    /// fingerprint yet, internally issued, not revoked. Returns true if
    /// the transition happened.
    pub async fn seal_grant(
        &self,
        id: &str,
        fingerprint: &str,
        note_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE badge_grants
            SET fingerprint = ?1, note_id = ?2
            WHERE id = ?3
              AND accept_key IS NULL
              AND fingerprint IS NULL
              AND accepted_at IS NOT NULL
              AND is_external = 0
              AND revoked_at IS NULL
            "#,
        )
        .bind(fingerprint)
        .bind(note_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stamp boosted_at. Returns false if already boosted or revoked.
    pub async fn mark_grant_boosted(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE badge_grants
            SET boosted_at = ?1
            WHERE id = ?2 AND boosted_at IS NULL AND revoked_at IS NULL
            "#,
        )
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stamp revoked_at (terminal). Returns false if already revoked.
    pub async fn mark_grant_revoked(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE badge_grants
            SET revoked_at = ?1
            WHERE id = ?2 AND revoked_at IS NULL
            "#,
        )
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Followers
    // =========================================================================

    /// Insert a follower relation unless it already exists.
    ///
    /// Returns true if the row was inserted.
    pub async fn insert_follower_if_absent(&self, follower: &Follower) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO followers (
                id, actor_id, follower_uri, inbox_uri, shared_inbox_uri,
                display_name, avatar_url, follow_activity_uri, created_at,
                profile_refreshed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (actor_id, follower_uri) DO NOTHING
            "#,
        )
        .bind(&follower.id)
        .bind(&follower.actor_id)
        .bind(&follower.follower_uri)
        .bind(&follower.inbox_uri)
        .bind(&follower.shared_inbox_uri)
        .bind(&follower.display_name)
        .bind(&follower.avatar_url)
        .bind(&follower.follow_activity_uri)
        .bind(ts(follower.created_at))
        .bind(opt_ts(follower.profile_refreshed_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a follower relation. Returns true if a row was removed.
    pub async fn delete_follower(
        &self,
        actor_id: &str,
        follower_uri: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM followers WHERE actor_id = ? AND follower_uri = ?")
            .bind(actor_id)
            .bind(follower_uri)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_followers(&self, actor_id: &str) -> Result<Vec<Follower>, AppError> {
        let followers = sqlx::query_as::<_, Follower>(
            "SELECT * FROM followers WHERE actor_id = ? ORDER BY created_at ASC",
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(followers)
    }

    /// Followers whose cached display metadata is stale.
    ///
    /// Used by the lazy profile refresh sweep.
    pub async fn get_followers_needing_refresh(
        &self,
        refreshed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Follower>, AppError> {
        let followers = sqlx::query_as::<_, Follower>(
            r#"
            SELECT * FROM followers
            WHERE profile_refreshed_at IS NULL OR profile_refreshed_at < ?
            ORDER BY profile_refreshed_at ASC
            LIMIT ?
            "#,
        )
        .bind(ts(refreshed_before))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(followers)
    }

    pub async fn update_follower_profile(
        &self,
        id: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE followers
            SET display_name = ?, avatar_url = ?, profile_refreshed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(display_name)
        .bind(avatar_url)
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Grant comments
    // =========================================================================

    /// Record a federated reply to a grant note, deduplicated by note URI.
    ///
    /// Returns true if the row was inserted.
    pub async fn insert_comment_if_absent(
        &self,
        comment: &GrantComment,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO grant_comments (id, grant_id, author_uri, note_uri, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (note_uri) DO NOTHING
            "#,
        )
        .bind(&comment.id)
        .bind(&comment.grant_id)
        .bind(&comment.author_uri)
        .bind(&comment.note_uri)
        .bind(&comment.content)
        .bind(ts(comment.created_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_comments(&self, grant_id: &str) -> Result<Vec<GrantComment>, AppError> {
        let comments = sqlx::query_as::<_, GrantComment>(
            "SELECT * FROM grant_comments WHERE grant_id = ? ORDER BY created_at ASC",
        )
        .bind(grant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(comments)
    }
}
