//! Credential lifecycle engine
//!
//! Grant lifecycle: created (awaiting acceptance) -> accepted -> sealed ->
//! broadcast -> boosted. Revocation is terminal and possible at any point.
//! Sealing signs a canonical note representation and derives the content
//! fingerprint from the signature.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::DomainConfig;
use crate::data::{parse_local_actor_uri, BadgeGrant, Database, EntityId, LocalActor};
use crate::error::AppError;
use crate::federation::{seal_payload, sha256_hex, ActivityDelivery};

const ACCEPT_KEY_LENGTH: usize = 32;

/// Credential lifecycle service
pub struct GrantService {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    protocol: String,
}

impl GrantService {
    pub fn new(db: Arc<Database>, http_client: Arc<reqwest::Client>, protocol: String) -> Self {
        Self {
            db,
            http_client,
            protocol,
        }
    }

    /// Issue a grant of a badge to a recipient.
    ///
    /// The grant starts in the awaiting-acceptance state: a one-time accept
    /// key is generated and stays on the row until the recipient accepts.
    pub async fn create_grant(
        &self,
        badge_id: &str,
        recipient_uri: &str,
        recipient_name: Option<String>,
        recipient_email: Option<String>,
    ) -> Result<BadgeGrant, AppError> {
        let badge = self.db.get_badge(badge_id).await?.ok_or(AppError::NotFound)?;
        let issuer = self
            .db
            .get_actor_by_id(&badge.actor_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let accept_key: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ACCEPT_KEY_LENGTH)
            .map(char::from)
            .collect();

        let grant = BadgeGrant {
            id: EntityId::new().0,
            badge_id: Some(badge.id.clone()),
            title: badge.title.clone(),
            description: badge.description.clone(),
            criteria: badge.criteria.clone(),
            issued_by: issuer.uri(&self.protocol),
            recipient_uri: recipient_uri.to_string(),
            recipient_name,
            recipient_email,
            issued_at: Utc::now(),
            accepted_at: None,
            boosted_at: None,
            revoked_at: None,
            accept_key: Some(accept_key),
            fingerprint: None,
            note_id: None,
            is_external: false,
            is_public: true,
        };

        self.db.insert_grant(&grant).await?;
        tracing::info!(grant_id = %grant.id, badge_id = %badge.id, recipient = %recipient_uri, "Grant created");
        Ok(grant)
    }

    /// Accept a grant with its one-time key.
    ///
    /// The key is cleared in the same conditional update that stamps the
    /// accept time, so a second accept with the same key fails.
    pub async fn accept(&self, grant_id: &str, accept_key: &str) -> Result<BadgeGrant, AppError> {
        let accepted = self.db.accept_grant(grant_id, accept_key).await?;
        if !accepted {
            return Err(AppError::Unauthorized);
        }
        tracing::info!(grant_id = %grant_id, "Grant accepted");
        self.db.get_grant(grant_id).await?.ok_or(AppError::NotFound)
    }

    /// Seal an accepted grant.
    ///
    /// Derives the canonical note, signs it, assigns the content fingerprint
    /// and the canonical note identifier. Preconditions (accepted, key
    /// cleared, not yet sealed, internally issued, not revoked) are enforced
    /// both here and by the conditional update underneath.
    pub async fn seal(&self, grant_id: &str) -> Result<BadgeGrant, AppError> {
        let grant = self.db.get_grant(grant_id).await?.ok_or(AppError::NotFound)?;

        if grant.is_revoked() {
            return Err(AppError::Unprocessable("Grant is revoked".to_string()));
        }
        if grant.is_external {
            return Err(AppError::Unprocessable(
                "Externally imported grants are already sealed".to_string(),
            ));
        }
        if grant.accept_key.is_some() || grant.accepted_at.is_none() {
            return Err(AppError::Unprocessable(
                "Grant has not been accepted".to_string(),
            ));
        }
        if grant.fingerprint.is_some() {
            return Err(AppError::Unprocessable(
                "Grant is already sealed".to_string(),
            ));
        }

        let issuer = self.resolve_issuer(&grant).await?;
        let badge_id = grant.badge_id.as_deref().ok_or_else(|| {
            AppError::Unprocessable("Grant has no badge definition".to_string())
        })?;
        if self.db.get_badge(badge_id).await?.is_none() {
            return Err(AppError::Unprocessable(
                "Badge definition cannot be resolved".to_string(),
            ));
        }

        let note_id = derive_note_id(
            &self.protocol,
            &issuer.domain,
            &grant.id,
            badge_id,
            &grant.recipient_uri,
        );
        let canonical = canonical_note(&grant, &note_id);
        let sealed = seal_payload(&issuer.private_key_pem, canonical.as_bytes())?;

        let updated = self
            .db
            .seal_grant(grant_id, &sealed.fingerprint, &note_id)
            .await?;
        if !updated {
            return Err(AppError::Unprocessable(
                "Grant is not awaiting seal".to_string(),
            ));
        }

        tracing::info!(grant_id = %grant_id, note_id = %note_id, fingerprint = %sealed.fingerprint, "Grant sealed");
        self.db.get_grant(grant_id).await?.ok_or(AppError::NotFound)
    }

    /// Broadcast a sealed grant to the issuer's followers, then boost it.
    ///
    /// Followers sharing one delivery endpoint receive a single request.
    pub async fn broadcast(&self, grant_id: &str, domain: &DomainConfig) -> Result<(), AppError> {
        let grant = self.db.get_grant(grant_id).await?.ok_or(AppError::NotFound)?;
        if grant.is_revoked() {
            return Err(AppError::Unprocessable("Grant is revoked".to_string()));
        }
        let note_id = grant.note_id.clone().ok_or_else(|| {
            AppError::Unprocessable("Grant has not been sealed".to_string())
        })?;

        let issuer = self.resolve_issuer(&grant).await?;
        let followers = self.db.get_followers(&issuer.id).await?;
        let endpoints: Vec<String> = followers
            .iter()
            .map(|f| f.delivery_endpoint().to_string())
            .collect();

        let note = grant_note(&grant, &note_id, &issuer.uri(&self.protocol));

        let delivery = self.delivery_for(&issuer);
        delivery.send_create(note, endpoints).await;

        tracing::info!(grant_id = %grant_id, "Grant broadcast to followers");

        self.boost(grant_id, domain).await
    }

    /// Boost a broadcast grant via the domain's relay identity.
    ///
    /// Idempotent: the boost timestamp is stamped in a conditional update,
    /// and a second call is a no-op.
    pub async fn boost(&self, grant_id: &str, domain: &DomainConfig) -> Result<(), AppError> {
        let grant = self.db.get_grant(grant_id).await?.ok_or(AppError::NotFound)?;
        let note_id = match grant.note_id {
            Some(ref note_id) => note_id.clone(),
            None => {
                return Err(AppError::Unprocessable(
                    "Grant has not been sealed".to_string(),
                ))
            }
        };

        let marked = self.db.mark_grant_boosted(grant_id).await?;
        if !marked {
            tracing::debug!(grant_id = %grant_id, "Boost skipped (already boosted or revoked)");
            return Ok(());
        }

        let relay = self
            .db
            .get_actor(&domain.domain, domain.relay_actor())
            .await?
            .ok_or(AppError::NotFound)?;
        let followers = self.db.get_followers(&relay.id).await?;
        let endpoints: Vec<String> = followers
            .iter()
            .map(|f| f.delivery_endpoint().to_string())
            .collect();

        let delivery = self.delivery_for(&relay);
        delivery.send_announce(&note_id, endpoints).await;

        tracing::info!(grant_id = %grant_id, relay = %relay.username, "Grant boosted");
        Ok(())
    }

    /// Revoke a grant.
    ///
    /// Sends a Delete referencing the canonical note to all followers and,
    /// best-effort, directly to the recipient. Revoking an already-revoked
    /// grant is a no-op: the terminal-state guard fails the conditional
    /// update and no second Delete goes out.
    pub async fn revoke(&self, grant_id: &str) -> Result<(), AppError> {
        let grant = self.db.get_grant(grant_id).await?.ok_or(AppError::NotFound)?;
        if grant.is_revoked() {
            tracing::debug!(grant_id = %grant_id, "Revoke skipped (already revoked)");
            return Ok(());
        }

        // Resolve the issuing identity before touching state: an externally
        // imported grant has a remote issuer, and it must not end up marked
        // revoked with no Delete sent.
        let issuer = if grant.note_id.is_some() {
            Some(self.resolve_issuer(&grant).await?)
        } else {
            None
        };

        let marked = self.db.mark_grant_revoked(grant_id).await?;
        if !marked {
            tracing::debug!(grant_id = %grant_id, "Revoke skipped (already revoked)");
            return Ok(());
        }

        let (note_id, issuer) = match (grant.note_id.as_ref(), issuer) {
            (Some(note_id), Some(issuer)) => (note_id.clone(), issuer),
            // Never broadcast, so nothing to retract.
            _ => {
                tracing::info!(grant_id = %grant_id, "Grant revoked before sealing");
                return Ok(());
            }
        };
        let followers = self.db.get_followers(&issuer.id).await?;
        let mut endpoints: Vec<String> = followers
            .iter()
            .map(|f| f.delivery_endpoint().to_string())
            .collect();

        // Best-effort direct notification of the recipient.
        if let Ok(recipient) =
            crate::federation::fetch_remote_actor(&grant.recipient_uri, &self.http_client).await
        {
            endpoints.push(recipient.inbox);
        } else {
            tracing::warn!(grant_id = %grant_id, recipient = %grant.recipient_uri, "Could not resolve recipient for revocation notice");
        }

        let delivery = self.delivery_for(&issuer);
        delivery.send_delete(&note_id, endpoints).await;

        tracing::info!(grant_id = %grant_id, "Grant revoked");
        Ok(())
    }

    async fn resolve_issuer(&self, grant: &BadgeGrant) -> Result<LocalActor, AppError> {
        let (domain, username) = parse_local_actor_uri(&grant.issued_by).ok_or_else(|| {
            AppError::Unprocessable(format!(
                "Issuing identity {} is not a local actor",
                grant.issued_by
            ))
        })?;
        self.db
            .get_actor(&domain, &username)
            .await?
            .ok_or_else(|| {
                AppError::Unprocessable(format!(
                    "Issuing identity {} cannot be resolved",
                    grant.issued_by
                ))
            })
    }

    fn delivery_for(&self, actor: &LocalActor) -> ActivityDelivery {
        ActivityDelivery::new(
            self.http_client.clone(),
            actor.uri(&self.protocol),
            actor.key_id(&self.protocol),
            actor.private_key_pem.clone(),
        )
    }
}

/// Canonical note identifier for a sealed grant.
///
/// Derived from {domain, grant id, badge id, hash of recipient identity};
/// the recipient hash keeps the identifier stable without leaking the
/// recipient URI into the path.
pub fn derive_note_id(
    protocol: &str,
    domain: &str,
    grant_id: &str,
    badge_id: &str,
    recipient_uri: &str,
) -> String {
    let recipient_hash = sha256_hex(recipient_uri.as_bytes());
    format!(
        "{}://{}/grants/{}-{}-{}",
        protocol,
        domain,
        grant_id,
        badge_id,
        &recipient_hash[..16]
    )
}

/// Canonical note representation used as the sealing payload.
///
/// Field set and serialization must stay stable: the fingerprint is derived
/// from the signature over exactly these bytes.
pub fn canonical_note(grant: &BadgeGrant, note_id: &str) -> String {
    serde_json::json!({
        "id": note_id,
        "type": "Note",
        "attributedTo": grant.issued_by,
        "title": grant.title,
        "description": grant.description,
        "criteria": grant.criteria,
        "recipient": grant.recipient_uri,
        "issuedAt": grant.issued_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    })
    .to_string()
}

/// Public ActivityPub note for a sealed grant.
pub fn grant_note(grant: &BadgeGrant, note_id: &str, issuer_uri: &str) -> serde_json::Value {
    let content = format!(
        "<p><strong>{}</strong></p><p>{}</p>",
        grant.title, grant.description
    );

    serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "Note",
        "id": note_id,
        "attributedTo": issuer_uri,
        "content": content,
        "published": grant.issued_at.to_rfc3339(),
        "to": [crate::federation::builder::PUBLIC_AUDIENCE],
        "cc": [format!("{}/followers", issuer_uri)],
        "tag": [{
            "type": "Mention",
            "href": grant.recipient_uri
        }],
        "attachment": [{
            "type": "PropertyValue",
            "name": "fingerprint",
            "value": grant.fingerprint
        }]
    })
}
