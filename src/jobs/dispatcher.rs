//! Activity dispatcher
//!
//! Maps a claimed job's declared type to one of five activity handlers.
//! Every handler writes to the job's audit log so operators can reconstruct
//! what a job actually did, independent of its final status.

use std::sync::Arc;

use chrono::Utc;

use crate::config::{AppConfig, DomainConfig};
use crate::data::{
    parse_local_actor_uri, Activity, Database, EntityId, Follower, GrantComment, Job, JobType,
    LocalActor,
};
use crate::error::AppError;
use crate::federation::{fetch_remote_object, ActivityDelivery, RemoteActorCache};
use crate::service::{ImportService, QuoteService};

/// Activity dispatcher
pub struct Dispatcher {
    db: Arc<Database>,
    config: Arc<AppConfig>,
    http_client: Arc<reqwest::Client>,
    actor_cache: Arc<RemoteActorCache>,
    quotes: QuoteService,
    import: ImportService,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Database>,
        config: Arc<AppConfig>,
        http_client: Arc<reqwest::Client>,
        actor_cache: Arc<RemoteActorCache>,
    ) -> Self {
        let quotes = QuoteService::new(
            db.clone(),
            http_client.clone(),
            actor_cache.clone(),
            config.server.protocol.clone(),
        );
        let import = ImportService::new(db.clone());

        Self {
            db,
            config,
            http_client,
            actor_cache,
            quotes,
            import,
        }
    }

    /// Dispatch one claimed job to its handler.
    ///
    /// Unknown job types and malformed payloads are permanent failures: they
    /// indicate a deployment mismatch, not a transient condition. The caller
    /// consults `AppError::is_retryable` to decide the failure mode.
    pub async fn dispatch(&self, job: &Job) -> Result<(), AppError> {
        let job_type = JobType::parse(&job.job_type).ok_or_else(|| {
            AppError::Unprocessable(format!("Unknown job type: {}", job.job_type))
        })?;

        let activity: Activity = serde_json::from_str(&job.payload)
            .map_err(|e| AppError::Unprocessable(format!("Malformed job payload: {}", e)))?;

        let domain = self.config.federation.domain(&job.domain).ok_or_else(|| {
            AppError::Unprocessable(format!("Domain {} is not served here", job.domain))
        })?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            domain = %job.domain,
            actor = %activity.actor,
            "Dispatching job"
        );

        match job_type {
            JobType::AcceptFollow => self.handle_accept_follow(job, domain, &activity).await,
            JobType::Unfollow => self.handle_unfollow(job, domain, &activity).await,
            JobType::ProcessQuoteRequest => {
                self.handle_quote_request(job, domain, &activity).await
            }
            JobType::CreateActivity => self.handle_create(job, &activity).await,
            JobType::ProcessAnnounce => self.handle_announce(job, &activity).await,
        }
    }

    /// Record a follower relation and send a signed Accept back.
    async fn handle_accept_follow(
        &self,
        job: &Job,
        domain: &DomainConfig,
        activity: &Activity,
    ) -> Result<(), AppError> {
        let target_uri = activity.object_uri().ok_or_else(|| {
            AppError::Unprocessable("Follow has no target object".to_string())
        })?;

        let followed = self.resolve_local_actor(domain, target_uri).await?;
        let requester = self.actor_cache.get(&activity.actor).await?;

        let follower = Follower {
            id: EntityId::new().0,
            actor_id: followed.id.clone(),
            follower_uri: requester.id.clone(),
            inbox_uri: requester.inbox.clone(),
            shared_inbox_uri: requester.shared_inbox.clone(),
            display_name: requester.display_name.clone(),
            avatar_url: requester.icon_url.clone(),
            follow_activity_uri: activity.id.clone(),
            created_at: Utc::now(),
            profile_refreshed_at: Some(Utc::now()),
        };

        let inserted = self.db.insert_follower_if_absent(&follower).await?;
        self.db
            .append_job_log(
                &job.id,
                &format!(
                    "follower {} {} for {}",
                    requester.id,
                    if inserted { "recorded" } else { "already known" },
                    followed.username
                ),
            )
            .await?;

        let follow_uri = activity.id.as_deref().unwrap_or(target_uri);
        let delivery = self.delivery_for(&followed);
        delivery
            .send_accept_follow(follow_uri, &activity.actor, &requester.inbox)
            .await?;

        self.db
            .append_job_log(&job.id, &format!("accept sent to {}", requester.inbox))
            .await?;
        Ok(())
    }

    /// Remove a follower relation. The protocol requires no outbound reply.
    async fn handle_unfollow(
        &self,
        job: &Job,
        domain: &DomainConfig,
        activity: &Activity,
    ) -> Result<(), AppError> {
        // The payload is an Undo whose object is the original Follow; the
        // followed local actor sits on the inner object.
        let follow = activity.object.as_ref().ok_or_else(|| {
            AppError::Unprocessable("Undo has no embedded Follow".to_string())
        })?;

        let target_uri = follow["object"].as_str().ok_or_else(|| {
            AppError::Unprocessable("Embedded Follow has no target".to_string())
        })?;

        // Same resolution as Follow, default identity included, so an Undo
        // always reaches the identity that recorded the relation.
        let followed = self.resolve_local_actor(domain, target_uri).await?;

        let removed = self.db.delete_follower(&followed.id, &activity.actor).await?;
        self.actor_cache.invalidate(&activity.actor).await;
        self.db
            .append_job_log(
                &job.id,
                &format!(
                    "follower {} {}",
                    activity.actor,
                    if removed { "removed" } else { "was not following" }
                ),
            )
            .await?;
        Ok(())
    }

    /// Auto-approve a quote request with a stamp URL.
    async fn handle_quote_request(
        &self,
        job: &Job,
        domain: &DomainConfig,
        activity: &Activity,
    ) -> Result<(), AppError> {
        let stamp_url = self.quotes.auto_approve(domain, activity).await?;
        self.db
            .append_job_log(&job.id, &format!("quote approved with stamp {}", stamp_url))
            .await?;
        Ok(())
    }

    /// Handle an inbound Create: a reply to a grant note becomes a comment,
    /// a credential-shaped attachment triggers import, anything else is a
    /// no-op.
    async fn handle_create(&self, job: &Job, activity: &Activity) -> Result<(), AppError> {
        let object = activity.object.as_ref().ok_or_else(|| {
            AppError::Unprocessable("Create has no object".to_string())
        })?;

        self.apply_object(job, &activity.actor, object).await
    }

    /// Handle an inbound Announce: resolve the announced object, then apply
    /// the same logic as a direct Create.
    async fn handle_announce(&self, job: &Job, activity: &Activity) -> Result<(), AppError> {
        let object_uri = activity.object_uri().ok_or_else(|| {
            AppError::Unprocessable("Announce has no object".to_string())
        })?;

        let object = fetch_remote_object(object_uri, &self.http_client).await?;
        self.db
            .append_job_log(&job.id, &format!("resolved announced object {}", object_uri))
            .await?;

        let author = object["attributedTo"]
            .as_str()
            .unwrap_or(&activity.actor)
            .to_string();
        self.apply_object(job, &author, &object).await
    }

    /// Shared Create/Announce object logic.
    async fn apply_object(
        &self,
        job: &Job,
        author_uri: &str,
        object: &serde_json::Value,
    ) -> Result<(), AppError> {
        if let Some(in_reply_to) = object["inReplyTo"].as_str() {
            if let Some(grant) = self.db.get_grant_by_note_id(in_reply_to).await? {
                let comment = GrantComment {
                    id: EntityId::new().0,
                    grant_id: grant.id.clone(),
                    author_uri: author_uri.to_string(),
                    note_uri: object["id"].as_str().unwrap_or_default().to_string(),
                    content: object["content"].as_str().unwrap_or_default().to_string(),
                    created_at: Utc::now(),
                };
                let inserted = self.db.insert_comment_if_absent(&comment).await?;
                self.db
                    .append_job_log(
                        &job.id,
                        &format!(
                            "comment on grant {} {}",
                            grant.id,
                            if inserted { "recorded" } else { "already known" }
                        ),
                    )
                    .await?;
                return Ok(());
            }
        }

        match self.import.import_from_object(object).await? {
            Some(grant) => {
                self.db
                    .append_job_log(&job.id, &format!("imported external grant {}", grant.id))
                    .await?;
            }
            None => {
                self.db
                    .append_job_log(&job.id, "object carried nothing to record")
                    .await?;
            }
        }
        Ok(())
    }

    async fn resolve_local_actor(
        &self,
        domain: &DomainConfig,
        target_uri: &str,
    ) -> Result<LocalActor, AppError> {
        if let Some((actor_domain, username)) = parse_local_actor_uri(target_uri) {
            if let Some(actor) = self.db.get_actor(&actor_domain, &username).await? {
                return Ok(actor);
            }
        }
        self.db
            .get_actor(&domain.domain, &domain.default_actor)
            .await?
            .ok_or_else(|| {
                AppError::Unprocessable(format!(
                    "No identity can handle target {}",
                    target_uri
                ))
            })
    }

    fn delivery_for(&self, actor: &LocalActor) -> ActivityDelivery {
        ActivityDelivery::new(
            self.http_client.clone(),
            actor.uri(&self.config.server.protocol),
            actor.key_id(&self.config.server.protocol),
            actor.private_key_pem.clone(),
        )
    }
}
