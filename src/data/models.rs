//! Data models
//!
//! Rust structs representing database entities.
//! All models use ULID for IDs and chrono for timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Job types the dispatcher knows how to handle
///
/// Stored as a string column; parsed back at dispatch time so that a row
/// written by a newer deployment fails permanently instead of looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    /// Record a follower and send a signed Accept back
    AcceptFollow,
    /// Remove a follower relation
    Unfollow,
    /// Auto-approve an inbound quote request with a stamp URL
    ProcessQuoteRequest,
    /// Handle an inbound Create (reply comment or credential import)
    CreateActivity,
    /// Handle an inbound Announce (resolve object, then import logic)
    ProcessAnnounce,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptFollow => "accept_follow",
            Self::Unfollow => "unfollow",
            Self::ProcessQuoteRequest => "process_quote_request",
            Self::CreateActivity => "create_activity",
            Self::ProcessAnnounce => "process_announce",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accept_follow" => Some(Self::AcceptFollow),
            "unfollow" => Some(Self::Unfollow),
            "process_quote_request" => Some(Self::ProcessQuoteRequest),
            "create_activity" => Some(Self::CreateActivity),
            "process_announce" => Some(Self::ProcessAnnounce),
            _ => None,
        }
    }
}

/// A unit of deferred federation work
///
/// Created when an inbound activity is accepted at the boundary, mutated
/// only by the job runner, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    /// One of the JobType strings
    pub job_type: String,
    /// Owning federation domain
    pub domain: String,
    /// pending | processing | completed | failed
    pub status: String,
    /// Serialized Activity JSON, stored verbatim
    pub payload: String,
    pub retry_count: i64,
    pub max_retries: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Eligibility gate: invisible to claimers until this passes
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub notes: Option<String>,
}

/// Append-only audit log row for a job
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobLogEntry {
    pub id: i64,
    pub job_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Activity
// =============================================================================

/// An inbound federation message
///
/// Immutable once received; serialized verbatim into a job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub actor: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
    /// Second object reference carried by quote requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<serde_json::Value>,
}

impl Activity {
    /// URI of the activity object, whether it is a bare string or an
    /// embedded object with an "id" field.
    pub fn object_uri(&self) -> Option<&str> {
        match self.object.as_ref()? {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Object(map) => map.get("id").and_then(|v| v.as_str()),
            _ => None,
        }
    }

    /// URI of the instrument (the quoting object in a quote request).
    pub fn instrument_uri(&self) -> Option<&str> {
        match self.instrument.as_ref()? {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Object(map) => map.get("id").and_then(|v| v.as_str()),
            _ => None,
        }
    }
}

// =============================================================================
// Local actors (identities)
// =============================================================================

/// A local federated identity (issuer or relay)
///
/// The private key never leaves the owning domain's trust boundary.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocalActor {
    pub id: String,
    pub username: String,
    pub domain: String,
    pub display_name: Option<String>,
    pub summary: Option<String>,
    /// RSA private key (PEM format)
    pub private_key_pem: String,
    /// RSA public key (PEM format)
    pub public_key_pem: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalActor {
    /// Canonical actor URI, e.g. "https://b.example/actors/b.example/alice"
    pub fn uri(&self, protocol: &str) -> String {
        format!(
            "{}://{}/actors/{}/{}",
            protocol, self.domain, self.domain, self.username
        )
    }

    /// Key identifier used in HTTP signatures
    pub fn key_id(&self, protocol: &str) -> String {
        format!("{}#main-key", self.uri(protocol))
    }
}

/// Parse a canonical local actor URI into (domain, username).
///
/// Returns None for URIs not shaped like "{base}/actors/{domain}/{username}".
pub fn parse_local_actor_uri(uri: &str) -> Option<(String, String)> {
    let parsed = url::Url::parse(uri).ok()?;
    let mut segments = parsed.path_segments()?;
    if segments.next()? != "actors" {
        return None;
    }
    let domain = segments.next()?;
    let username = segments.next()?;
    if domain.is_empty() || username.is_empty() || segments.next().is_some() {
        return None;
    }
    Some((domain.to_string(), username.to_string()))
}

// =============================================================================
// Badges and grants
// =============================================================================

/// A badge definition owned by a local issuing identity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Badge {
    pub id: String,
    /// Issuing identity (arena-style key into actors)
    pub actor_id: String,
    pub domain: String,
    pub title: String,
    pub description: String,
    pub criteria: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One credential issuance
///
/// Lifecycle: created (awaiting acceptance) -> accepted -> sealed ->
/// broadcast -> boosted; revocable at any point after creation (terminal).
/// Invariant: at most one of {accept_key, fingerprint} is present for an
/// internally issued grant.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BadgeGrant {
    pub id: String,
    /// Badge definition key; None for externally imported grants
    pub badge_id: Option<String>,
    pub title: String,
    pub description: String,
    pub criteria: Option<String>,
    /// Issuing identity URI
    pub issued_by: String,
    pub recipient_uri: String,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub boosted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// One-time accept key, present until accepted
    pub accept_key: Option<String>,
    /// Content fingerprint, present only once sealed
    pub fingerprint: Option<String>,
    /// Canonical external note identifier
    pub note_id: Option<String>,
    pub is_external: bool,
    pub is_public: bool,
}

impl BadgeGrant {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

// =============================================================================
// Followers and comments
// =============================================================================

/// A remote actor following a local identity
///
/// Inbox URIs are cached for delivery; display metadata is refreshed
/// lazily by a background sweep.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Follower {
    pub id: String,
    /// Followed local identity (arena-style key into actors)
    pub actor_id: String,
    pub follower_uri: String,
    pub inbox_uri: String,
    pub shared_inbox_uri: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// URI of the original Follow activity
    pub follow_activity_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub profile_refreshed_at: Option<DateTime<Utc>>,
}

impl Follower {
    /// Delivery endpoint: shared inbox when known, personal inbox otherwise.
    pub fn delivery_endpoint(&self) -> &str {
        self.shared_inbox_uri.as_deref().unwrap_or(&self.inbox_uri)
    }
}

/// A federated reply recorded against a grant note
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GrantComment {
    pub id: String,
    pub grant_id: String,
    pub author_uri: String,
    pub note_uri: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trips_through_strings() {
        for job_type in [
            JobType::AcceptFollow,
            JobType::Unfollow,
            JobType::ProcessQuoteRequest,
            JobType::CreateActivity,
            JobType::ProcessAnnounce,
        ] {
            assert_eq!(JobType::parse(job_type.as_str()), Some(job_type));
        }
        assert_eq!(JobType::parse("send_email"), None);
    }

    #[test]
    fn activity_object_uri_handles_string_and_embedded_object() {
        let bare: Activity = serde_json::from_value(serde_json::json!({
            "actor": "https://a.example/users/bob",
            "type": "Follow",
            "object": "https://b.example/actors/b.example/alice"
        }))
        .unwrap();
        assert_eq!(
            bare.object_uri(),
            Some("https://b.example/actors/b.example/alice")
        );

        let embedded: Activity = serde_json::from_value(serde_json::json!({
            "actor": "https://a.example/users/bob",
            "type": "Create",
            "object": { "id": "https://a.example/notes/1", "type": "Note" }
        }))
        .unwrap();
        assert_eq!(embedded.object_uri(), Some("https://a.example/notes/1"));
    }

    #[test]
    fn parse_local_actor_uri_accepts_canonical_shape_only() {
        assert_eq!(
            parse_local_actor_uri("https://b.example/actors/b.example/alice"),
            Some(("b.example".to_string(), "alice".to_string()))
        );
        assert_eq!(
            parse_local_actor_uri("https://b.example/users/alice"),
            None
        );
        assert_eq!(
            parse_local_actor_uri("https://b.example/actors/b.example/alice/inbox"),
            None
        );
    }

    #[test]
    fn follower_delivery_endpoint_prefers_shared_inbox() {
        let follower = Follower {
            id: EntityId::new().0,
            actor_id: "actor".to_string(),
            follower_uri: "https://a.example/users/bob".to_string(),
            inbox_uri: "https://a.example/users/bob/inbox".to_string(),
            shared_inbox_uri: Some("https://a.example/inbox".to_string()),
            display_name: None,
            avatar_url: None,
            follow_activity_uri: None,
            created_at: Utc::now(),
            profile_refreshed_at: None,
        };
        assert_eq!(follower.delivery_endpoint(), "https://a.example/inbox");
    }
}
