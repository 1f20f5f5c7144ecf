//! Activity delivery
//!
//! Sends signed activities to remote inbox endpoints.

use std::sync::Arc;

use crate::error::AppError;
use crate::metrics::DELIVERIES_TOTAL;

/// Activity delivery service
///
/// Delivers activities on behalf of one local actor. Each domain's issuing
/// actor gets its own instance carrying that actor's signing key.
#[derive(Clone)]
pub struct ActivityDelivery {
    http_client: Arc<reqwest::Client>,
    /// Local actor URI
    actor_uri: String,
    /// Key ID for signatures
    key_id: String,
    /// Private key for signing
    private_key_pem: String,
}

/// Deduplicate identical inbox URIs while keeping distinct personal inboxes.
///
/// Followers on the same server usually share one inbox endpoint; collapsing
/// exact duplicates keeps delivery at one request per endpoint without
/// dropping recipients that use distinct personal inbox paths.
fn unique_inbox_targets(inbox_uris: Vec<String>) -> Vec<String> {
    use std::collections::HashSet;

    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for inbox_uri in inbox_uris {
        if seen.contains(&inbox_uri) {
            continue;
        }
        seen.insert(inbox_uri.clone());
        targets.push(inbox_uri);
    }

    targets
}

impl ActivityDelivery {
    /// Create new delivery service
    pub fn new(
        http_client: Arc<reqwest::Client>,
        actor_uri: String,
        key_id: String,
        private_key_pem: String,
    ) -> Self {
        Self {
            http_client,
            actor_uri,
            key_id,
            private_key_pem,
        }
    }

    /// Deliver activity to a single inbox
    ///
    /// # Errors
    /// Returns error if delivery fails (network, signature, rejection)
    pub async fn deliver_to_inbox(
        &self,
        inbox_uri: &str,
        activity: serde_json::Value,
    ) -> Result<(), AppError> {
        let body = serde_json::to_vec(&activity)
            .map_err(|e| AppError::Validation(format!("Failed to serialize activity: {}", e)))?;

        let sig_headers = crate::federation::sign_request(
            "POST",
            inbox_uri,
            Some(&body),
            &self.private_key_pem,
            &self.key_id,
        )?;

        let mut request = self
            .http_client
            .post(inbox_uri)
            .header("Content-Type", "application/activity+json")
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body).send().await.map_err(|e| {
            DELIVERIES_TOTAL.with_label_values(&["error"]).inc();
            AppError::Federation(format!("Failed to deliver to {}: {}", inbox_uri, e))
        })?;

        if !response.status().is_success() {
            DELIVERIES_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(AppError::Federation(format!(
                "Inbox {} rejected activity: HTTP {}",
                inbox_uri,
                response.status()
            )));
        }

        DELIVERIES_TOTAL.with_label_values(&["delivered"]).inc();
        tracing::info!("Delivered activity to {}", inbox_uri);
        Ok(())
    }

    /// Deliver activity to many inboxes in parallel
    ///
    /// Deduplicates identical inbox URIs, then fans out with a concurrency
    /// cap. Individual failures are reported per target, never propagated.
    pub async fn deliver_to_many(
        &self,
        activity: serde_json::Value,
        inbox_uris: Vec<String>,
    ) -> Vec<DeliveryResult> {
        use tokio::sync::Semaphore;

        let total_targets = inbox_uris.len();
        let delivery_targets = unique_inbox_targets(inbox_uris);

        tracing::info!(
            "Delivering to {} unique inboxes (deduplicated from {} total)",
            delivery_targets.len(),
            total_targets
        );

        const MAX_CONCURRENT: usize = 10;
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT));
        let activity = Arc::new(activity);

        let mut tasks = Vec::new();

        for inbox_uri in delivery_targets {
            let semaphore = semaphore.clone();
            let activity = activity.clone();
            let self_clone = self.clone();

            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();

                let result = self_clone
                    .deliver_to_inbox(&inbox_uri, (*activity).clone())
                    .await;

                DeliveryResult {
                    inbox_uri: inbox_uri.clone(),
                    success: result.is_ok(),
                    error: result.err().map(|e| e.to_string()),
                }
            });

            tasks.push(task);
        }

        let mut results = Vec::new();
        for task in tasks {
            if let Ok(result) = task.await {
                results.push(result);
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let failure_count = results.len() - success_count;

        tracing::info!(
            "Batch delivery complete: {} succeeded, {} failed",
            success_count,
            failure_count
        );

        results
    }

    /// Send Accept for an incoming Follow
    pub async fn send_accept_follow(
        &self,
        follow_activity_uri: &str,
        follower_uri: &str,
        follower_inbox_uri: &str,
    ) -> Result<(), AppError> {
        let accept_id = format!(
            "{}/accept/{}",
            self.actor_uri,
            crate::data::EntityId::new().0
        );

        let activity = builder::accept(
            &accept_id,
            &self.actor_uri,
            serde_json::json!({
                "type": "Follow",
                "id": follow_activity_uri,
                "actor": follower_uri,
                "object": self.actor_uri
            }),
        );

        self.deliver_to_inbox(follower_inbox_uri, activity).await?;

        tracing::info!(
            "Sent Accept to {} for Follow {}",
            follower_inbox_uri,
            follow_activity_uri
        );
        Ok(())
    }

    /// Send Accept for a quote request, carrying the authorization stamp
    ///
    /// The `result` field on the embedded request object points at the stamp
    /// URL; quoting servers resolve it to display the quote as authorized.
    pub async fn send_accept_quote(
        &self,
        quote_request_uri: &str,
        requester_uri: &str,
        quoted_object_uri: &str,
        stamp_url: &str,
        requester_inbox_uri: &str,
    ) -> Result<(), AppError> {
        let accept_id = format!(
            "{}/accept/{}",
            self.actor_uri,
            crate::data::EntityId::new().0
        );

        let activity = builder::accept(
            &accept_id,
            &self.actor_uri,
            serde_json::json!({
                "type": "QuoteRequest",
                "id": quote_request_uri,
                "actor": requester_uri,
                "object": quoted_object_uri,
                "result": stamp_url
            }),
        );

        self.deliver_to_inbox(requester_inbox_uri, activity).await?;

        tracing::info!(
            "Sent quote authorization {} to {}",
            stamp_url,
            requester_inbox_uri
        );
        Ok(())
    }

    /// Send Create wrapping a sealed grant note
    pub async fn send_create(
        &self,
        note: serde_json::Value,
        inbox_uris: Vec<String>,
    ) -> Vec<DeliveryResult> {
        let create_id = format!(
            "{}/create/{}",
            self.actor_uri,
            crate::data::EntityId::new().0
        );
        let activity = builder::create(&create_id, &self.actor_uri, note);

        self.deliver_to_many(activity, inbox_uris).await
    }

    /// Send Announce (boost) of a note
    pub async fn send_announce(
        &self,
        object_uri: &str,
        inbox_uris: Vec<String>,
    ) -> Vec<DeliveryResult> {
        let announce_id = format!(
            "{}/announce/{}",
            self.actor_uri,
            crate::data::EntityId::new().0
        );
        let activity = builder::announce(&announce_id, &self.actor_uri, object_uri);

        self.deliver_to_many(activity, inbox_uris).await
    }

    /// Send Delete with a Tombstone object (revocation)
    pub async fn send_delete(
        &self,
        object_uri: &str,
        inbox_uris: Vec<String>,
    ) -> Vec<DeliveryResult> {
        let delete_id = format!(
            "{}/delete/{}",
            self.actor_uri,
            crate::data::EntityId::new().0
        );
        let activity = builder::delete(&delete_id, &self.actor_uri, object_uri);

        self.deliver_to_many(activity, inbox_uris).await
    }
}

/// Result of a delivery attempt
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// Target inbox URI
    pub inbox_uri: String,
    /// Whether delivery succeeded
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
}

/// Build ActivityPub activity JSON
pub mod builder {
    use serde_json::Value;

    pub const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `object` - Original activity being accepted
    pub fn accept(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Accept",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build a Create activity
    ///
    /// Grant notes are always public: the note itself carries the audience
    /// and the wrapping Create repeats it.
    pub fn create(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Create",
            "id": id,
            "actor": actor,
            "object": object,
            "to": [PUBLIC_AUDIENCE],
            "cc": [format!("{}/followers", actor)],
            "published": chrono::Utc::now().to_rfc3339()
        })
    }

    /// Build an Announce activity (boost)
    pub fn announce(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Announce",
            "id": id,
            "actor": actor,
            "object": object,
            "to": [PUBLIC_AUDIENCE],
            "cc": [format!("{}/followers", actor)],
            "published": chrono::Utc::now().to_rfc3339()
        })
    }

    /// Build a Delete activity wrapping a Tombstone
    pub fn delete(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Delete",
            "id": id,
            "actor": actor,
            "object": {
                "type": "Tombstone",
                "id": object
            },
            "to": [PUBLIC_AUDIENCE],
            "cc": [format!("{}/followers", actor)]
        })
    }
}
