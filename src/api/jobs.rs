//! Job introspection endpoints
//!
//! Read-only operational visibility into the job queue.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};

use crate::error::AppError;
use crate::AppState;

/// Create job introspection router
///
/// Routes:
/// - GET /jobs/stats - counts per domain per status
/// - GET /jobs/:id - one job with its audit log
pub fn jobs_router() -> Router<AppState> {
    Router::new()
        .route("/jobs/stats", get(stats))
        .route("/jobs/:id", get(job_detail))
}

/// GET /jobs/stats
async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let counts = state.db.job_status_counts().await?;

    let mut by_domain: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    for (domain, status, count) in counts {
        by_domain.entry(domain).or_default().insert(status, count);
    }

    Ok(Json(serde_json::json!({ "domains": by_domain })))
}

/// GET /jobs/:id
async fn job_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state.db.get_job(&id).await?.ok_or(AppError::NotFound)?;
    let logs = state.db.get_job_logs(&id).await?;

    Ok(Json(serde_json::json!({
        "job": job,
        "log": logs
    })))
}
