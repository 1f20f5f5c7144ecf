//! ActivityPub endpoints
//!
//! - Shared inbox (activity receiving)
//! - Actor profiles and follower collections
//! - Published grant notes

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use http::HeaderMap;

use crate::config::DomainConfig;
use crate::data::{Activity, EntityId, Job, JobType};
use crate::error::AppError;
use crate::metrics::ACTIVITIES_RECEIVED_TOTAL;
use crate::AppState;

/// Create ActivityPub router
///
/// Routes:
/// - POST /inbox - Shared inbox
/// - GET /actors/:domain/:username - Actor profile
/// - GET /actors/:domain/:username/followers - Followers collection
/// - GET /grants/:token - Published grant note
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/inbox", post(inbox))
        .route("/actors/:domain/:username", get(actor))
        .route("/actors/:domain/:username/followers", get(followers))
        .route("/grants/:token", get(grant_note))
}

/// Served domain for a request, resolved from the Host header.
///
/// Falls back to the first configured domain so that local and test setups
/// reaching the server by IP still land somewhere sensible.
pub(crate) fn resolve_domain(state: &AppState, headers: &HeaderMap) -> DomainConfig {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h));

    if let Some(host) = host {
        if let Some(domain) = state.config.federation.domain(host) {
            return domain.clone();
        }
    }

    state.config.federation.domains[0].clone()
}

/// Map an inbound activity to the job type that will process it.
///
/// Exactly one job per recognized activity; Delete and anything unknown is
/// rejected synchronously.
fn classify_activity(activity: &Activity) -> Result<JobType, AppError> {
    match activity.activity_type.as_str() {
        "Follow" => Ok(JobType::AcceptFollow),
        "Undo" => {
            let inner_type = activity
                .object
                .as_ref()
                .and_then(|o| o["type"].as_str())
                .unwrap_or_default();
            if inner_type == "Follow" {
                Ok(JobType::Unfollow)
            } else {
                Err(AppError::Unprocessable(format!(
                    "Undo of {} is not supported",
                    inner_type
                )))
            }
        }
        "QuoteRequest" => Ok(JobType::ProcessQuoteRequest),
        "Create" => Ok(JobType::CreateActivity),
        "Announce" => Ok(JobType::ProcessAnnounce),
        other => Err(AppError::Unprocessable(format!(
            "Activity type {} is not supported",
            other
        ))),
    }
}

/// POST /inbox
///
/// The inbound boundary does no processing beyond classification: the
/// activity is stored verbatim as a job payload and handled asynchronously
/// by the job runner.
async fn inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    // Unsigned requests are rejected before any parsing.
    if headers.get("signature").is_none() {
        return Err(AppError::Unauthorized);
    }

    let activity: Activity = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid activity JSON: {}", e)))?;

    ACTIVITIES_RECEIVED_TOTAL
        .with_label_values(&[&activity.activity_type])
        .inc();

    let job_type = classify_activity(&activity)?;
    let domain = resolve_domain(&state, &headers);
    let now = chrono::Utc::now();

    let job = Job {
        id: EntityId::new().0,
        job_type: job_type.as_str().to_string(),
        domain: domain.domain.clone(),
        status: "pending".to_string(),
        payload: serde_json::to_string(&activity)
            .map_err(|e| AppError::Validation(format!("Failed to serialize activity: {}", e)))?,
        retry_count: 0,
        max_retries: state.config.jobs.max_retries,
        last_error: None,
        created_at: now,
        scheduled_for: now,
        started_at: None,
        completed_at: None,
        created_by: Some("inbox".to_string()),
        notes: None,
    };

    state.db.enqueue_job(&job).await?;

    tracing::info!(
        job_id = %job.id,
        job_type = %job.job_type,
        activity_type = %activity.activity_type,
        actor = %activity.actor,
        "Inbound activity enqueued"
    );

    Ok(StatusCode::ACCEPTED)
}

/// GET /actors/:domain/:username
///
/// Returns the ActivityPub Actor document for a local issuing identity.
async fn actor(
    State(state): State<AppState>,
    Path((domain, username)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.config.federation.domain(&domain).is_none() {
        return Err(AppError::NotFound);
    }

    let actor = state
        .db
        .get_actor(&domain, &username)
        .await?
        .ok_or(AppError::NotFound)?;

    let protocol = &state.config.server.protocol;
    let actor_url = actor.uri(protocol);

    Ok(Json(serde_json::json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "type": "Service",
        "id": actor_url,
        "preferredUsername": actor.username,
        "name": actor.display_name.clone().unwrap_or_else(|| actor.username.clone()),
        "summary": actor.summary.clone().unwrap_or_default(),
        "inbox": format!("{}://{}/inbox", protocol, actor.domain),
        "followers": format!("{}/followers", actor_url),
        "endpoints": {
            "sharedInbox": format!("{}://{}/inbox", protocol, actor.domain)
        },
        "publicKey": {
            "id": actor.key_id(protocol),
            "owner": actor_url,
            "publicKeyPem": actor.public_key_pem
        }
    })))
}

/// GET /actors/:domain/:username/followers
async fn followers(
    State(state): State<AppState>,
    Path((domain, username)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let actor = state
        .db
        .get_actor(&domain, &username)
        .await?
        .ok_or(AppError::NotFound)?;

    let followers = state.db.get_followers(&actor.id).await?;
    let items: Vec<&str> = followers.iter().map(|f| f.follower_uri.as_str()).collect();
    let actor_url = actor.uri(&state.config.server.protocol);

    Ok(Json(serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "OrderedCollection",
        "id": format!("{}/followers", actor_url),
        "totalItems": items.len(),
        "orderedItems": items
    })))
}

/// GET /grants/:token
///
/// Serves the published note of a sealed grant. The token is the note id's
/// final path segment; the note id is reconstructed per served domain.
async fn grant_note(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let protocol = &state.config.server.protocol;

    for domain in &state.config.federation.domains {
        let note_id = format!("{}://{}/grants/{}", protocol, domain.domain, token);
        if let Some(grant) = state.db.get_grant_by_note_id(&note_id).await? {
            if grant.is_revoked() || !grant.is_public {
                return Err(AppError::NotFound);
            }
            return Ok(Json(crate::service::grant_note(
                &grant,
                &note_id,
                &grant.issued_by,
            )));
        }
    }

    Err(AppError::NotFound)
}
