//! Quote authorization protocol
//!
//! Proves a quoting relationship between two objects without persisting
//! authorization records. A stamp URL is a pure function of the two object
//! URIs and the owning domain; the trust model rests entirely on the
//! issuing identity's signature over the response.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::config::DomainConfig;
use crate::data::{parse_local_actor_uri, Activity, Database, LocalActor};
use crate::error::AppError;
use crate::federation::{ActivityDelivery, RemoteActorCache};

/// Compute the stamp URL for a quoting relationship.
///
/// `interacting` is the quoting object, `target` the object being quoted.
pub fn encode_stamp_url(protocol: &str, domain: &str, interacting: &str, target: &str) -> String {
    format!(
        "{}://{}/quote-stamps/{}/{}",
        protocol,
        domain,
        URL_SAFE_NO_PAD.encode(interacting),
        URL_SAFE_NO_PAD.encode(target)
    )
}

/// Decode one base64url stamp segment back into an object URI.
pub fn decode_stamp_segment(segment: &str) -> Result<String, AppError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AppError::Validation(format!("Invalid stamp segment: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::Validation(format!("Stamp segment is not UTF-8: {}", e)))
}

/// Quote authorization service
pub struct QuoteService {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    actor_cache: Arc<RemoteActorCache>,
    protocol: String,
}

impl QuoteService {
    pub fn new(
        db: Arc<Database>,
        http_client: Arc<reqwest::Client>,
        actor_cache: Arc<RemoteActorCache>,
        protocol: String,
    ) -> Self {
        Self {
            db,
            http_client,
            actor_cache,
            protocol,
        }
    }

    /// Resolve which local identity owns a quoted object.
    ///
    /// Grant notes resolve to their issuing identity; canonical local actor
    /// URIs resolve to themselves. Anything else falls back to the domain's
    /// default identity, never to a request failure.
    pub async fn resolve_owner(
        &self,
        domain: &DomainConfig,
        target_uri: &str,
    ) -> Result<LocalActor, AppError> {
        if let Some(grant) = self.db.get_grant_by_note_id(target_uri).await? {
            if let Some((actor_domain, username)) = parse_local_actor_uri(&grant.issued_by) {
                if let Some(actor) = self.db.get_actor(&actor_domain, &username).await? {
                    return Ok(actor);
                }
            }
        }

        if let Some((actor_domain, username)) = parse_local_actor_uri(target_uri) {
            if let Some(actor) = self.db.get_actor(&actor_domain, &username).await? {
                return Ok(actor);
            }
        }

        self.db
            .get_actor(&domain.domain, &domain.default_actor)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Auto-approve an inbound quote request.
    ///
    /// Computes the stamp URL and sends a signed Accept back whose result
    /// field is the stamp URL itself. Returns the stamp URL.
    pub async fn auto_approve(
        &self,
        domain: &DomainConfig,
        activity: &Activity,
    ) -> Result<String, AppError> {
        let target_uri = activity.object_uri().ok_or_else(|| {
            AppError::Unprocessable("Quote request has no target object".to_string())
        })?;
        let interacting_uri = activity.instrument_uri().ok_or_else(|| {
            AppError::Unprocessable("Quote request has no instrument".to_string())
        })?;
        let request_uri = activity.id.as_deref().ok_or_else(|| {
            AppError::Unprocessable("Quote request has no id".to_string())
        })?;

        let owner = self.resolve_owner(domain, target_uri).await?;
        let stamp_url =
            encode_stamp_url(&self.protocol, &domain.domain, interacting_uri, target_uri);

        let requester = self.actor_cache.get(&activity.actor).await?;

        let delivery = ActivityDelivery::new(
            self.http_client.clone(),
            owner.uri(&self.protocol),
            owner.key_id(&self.protocol),
            owner.private_key_pem.clone(),
        );

        delivery
            .send_accept_quote(
                request_uri,
                &activity.actor,
                target_uri,
                &stamp_url,
                &requester.inbox,
            )
            .await?;

        Ok(stamp_url)
    }

    /// Resolve a stamp back into a QuoteAuthorization document.
    ///
    /// Pure decode plus owner lookup; nothing is read from or written to
    /// any authorization table because none exists.
    pub async fn resolve_stamp(
        &self,
        domain: &DomainConfig,
        encoded_interacting: &str,
        encoded_target: &str,
    ) -> Result<serde_json::Value, AppError> {
        let interacting =
            decode_stamp_segment(encoded_interacting).map_err(|_| AppError::NotFound)?;
        let target = decode_stamp_segment(encoded_target).map_err(|_| AppError::NotFound)?;

        let owner = self.resolve_owner(domain, &target).await?;
        let stamp_url = encode_stamp_url(&self.protocol, &domain.domain, &interacting, &target);

        Ok(serde_json::json!({
            "@context": [
                "https://www.w3.org/ns/activitystreams",
                { "QuoteAuthorization": "https://w3id.org/fep/044f#QuoteAuthorization" }
            ],
            "type": "QuoteAuthorization",
            "id": stamp_url,
            "attributedTo": owner.uri(&self.protocol),
            "interactingObject": interacting,
            "interactionTarget": target
        }))
    }
}
