//! Quote stamp endpoint
//!
//! Serves QuoteAuthorization documents for stamp URLs. Nothing is read from
//! an authorization table; the document is recomputed from the URL itself.

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use http::HeaderMap;

use crate::error::AppError;
use crate::service::QuoteService;
use crate::AppState;

/// Create quote stamp router
///
/// Routes:
/// - GET /quote-stamps/:interacting/:target
pub fn stamps_router() -> Router<AppState> {
    Router::new().route("/quote-stamps/:interacting/:target", get(resolve_stamp))
}

/// GET /quote-stamps/:interacting/:target
///
/// Both segments are base64url-encoded object URIs. Undecodable segments
/// and unresolvable identities surface as 404.
async fn resolve_stamp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((interacting, target)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let domain = super::activitypub::resolve_domain(&state, &headers);

    let quotes = QuoteService::new(
        state.db.clone(),
        state.http_client.clone(),
        state.actor_cache.clone(),
        state.config.server.protocol.clone(),
    );

    let document = quotes.resolve_stamp(&domain, &interacting, &target).await?;
    Ok(Json(document))
}
