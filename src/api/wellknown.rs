//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/host-meta

use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::federation::generate_webfinger_response;
use crate::AppState;

/// Create well-known router
///
/// Routes:
/// - GET /.well-known/webfinger
/// - GET /.well-known/host-meta
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/host-meta", get(host_meta))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    resource: String,
}

/// GET /.well-known/webfinger
///
/// Query: ?resource=acct:user@domain
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let resource = &query.resource;

    let acct = resource.strip_prefix("acct:").ok_or_else(|| {
        AppError::Validation("Resource must start with 'acct:'".to_string())
    })?;

    let (username, domain) = acct
        .split_once('@')
        .ok_or_else(|| AppError::Validation("Invalid acct format".to_string()))?;

    if state.config.federation.domain(domain).is_none() {
        return Err(AppError::NotFound);
    }

    let actor = state
        .db
        .get_actor(domain, username)
        .await?
        .ok_or(AppError::NotFound)?;

    let response = generate_webfinger_response(
        &actor.username,
        &actor.domain,
        &state.config.server.protocol,
    );

    Ok(Json(serde_json::to_value(response).map_err(|e| {
        AppError::Internal(anyhow::anyhow!("Failed to serialize webfinger: {}", e))
    })?))
}

/// GET /.well-known/host-meta
///
/// Returns host-meta XML for WebFinger discovery. The template points at
/// the first configured domain; all served domains share one endpoint.
async fn host_meta(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    let domain = &state.config.federation.domains[0].domain;
    let base_url = state.config.server.base_url(domain);
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<XRD xmlns="http://docs.oasis-open.org/ns/xri/xrd-1.0">
  <Link rel="lrdd" template="{}/.well-known/webfinger?resource={{uri}}"/>
</XRD>"#,
        base_url
    );

    ([("Content-Type", "application/xrd+xml")], xml)
}
