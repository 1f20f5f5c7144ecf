//! BadgeHarbor - a federated verifiable-badge server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - ActivityPub inbox/actors (federation)                    │
//! │  - Quote stamps, job introspection, well-known              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Jobs + Service Layer                        │
//! │  - Polling job runner and activity dispatcher               │
//! │  - Credential lifecycle, quote authorization, import        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx): job queue, grants, followers              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for ActivityPub and operations
//! - `jobs`: durable job queue runner and dispatcher
//! - `service`: credential lifecycle, quotes, import
//! - `federation`: delivery, signatures, remote actors
//! - `data`: database layer
//! - `config`: configuration management
//! - `error`: error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod jobs;
pub mod metrics;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers
///
/// Cloned per request; contains shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// HTTP client for federation
    pub http_client: Arc<reqwest::Client>,

    /// Remote actor cache (bounded, TTL)
    pub actor_cache: Arc<federation::RemoteActorCache>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Initialize HTTP client and actor cache
    /// 3. Ensure each configured domain's identities exist
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!("Database connected");

        let http_client = Arc::new(
            reqwest::Client::builder()
                .user_agent(concat!("BadgeHarbor/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| error::AppError::Internal(e.into()))?,
        );

        let actor_cache = Arc::new(federation::RemoteActorCache::new(
            http_client.clone(),
            Duration::from_secs(config.cache.actor_ttl),
            config.cache.actor_max_entries,
        ));

        Self::ensure_domain_actors(&db, &config).await?;

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            http_client,
            actor_cache,
        })
    }

    /// Ensure the default and relay identities exist for every served domain.
    ///
    /// Generates an RSA keypair for each missing identity. Existing rows are
    /// never touched, so keys are stable across restarts.
    async fn ensure_domain_actors(
        db: &data::Database,
        config: &config::AppConfig,
    ) -> Result<(), error::AppError> {
        for domain in &config.federation.domains {
            let mut usernames = vec![domain.default_actor.as_str()];
            if domain.relay_actor() != domain.default_actor {
                usernames.push(domain.relay_actor());
            }

            for username in usernames {
                if db.get_actor(&domain.domain, username).await?.is_some() {
                    continue;
                }

                tracing::info!(domain = %domain.domain, username = %username, "Creating local identity");
                let actor = Self::generate_actor(
                    &domain.domain,
                    username,
                    config.federation.key_bits,
                )?;
                db.insert_actor_if_absent(&actor).await?;
            }
        }
        Ok(())
    }

    fn generate_actor(
        domain: &str,
        username: &str,
        key_bits: usize,
    ) -> Result<data::LocalActor, error::AppError> {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::{RsaPrivateKey, RsaPublicKey};

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, key_bits)
            .map_err(|e| error::AppError::Internal(e.into()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| error::AppError::Internal(e.into()))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| error::AppError::Internal(e.into()))?;

        let now = chrono::Utc::now();
        Ok(data::LocalActor {
            id: data::EntityId::new().0,
            username: username.to_string(),
            domain: domain.to_string(),
            display_name: Some(format!("{} badges", domain)),
            summary: Some("Verifiable badge issuer".to_string()),
            private_key_pem,
            public_key_pem,
            created_at: now,
            updated_at: now,
        })
    }

    /// Refresh cached display metadata for stale followers.
    ///
    /// Best-effort: an unreachable follower server skips that follower and
    /// moves on.
    pub async fn refresh_stale_follower_profiles(
        &self,
        stale_after: chrono::Duration,
        limit: i64,
    ) -> Result<usize, error::AppError> {
        let cutoff = chrono::Utc::now() - stale_after;
        let stale = self.db.get_followers_needing_refresh(cutoff, limit).await?;
        let mut refreshed = 0;

        for follower in stale {
            match federation::fetch_remote_actor(&follower.follower_uri, &self.http_client).await
            {
                Ok(actor) => {
                    self.db
                        .update_follower_profile(
                            &follower.id,
                            actor.display_name.as_deref(),
                            actor.icon_url.as_deref(),
                        )
                        .await?;
                    refreshed += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        follower = %follower.follower_uri,
                        error = %e,
                        "Skipping follower profile refresh"
                    );
                }
            }
        }

        if refreshed > 0 {
            tracing::info!(refreshed, "Follower profiles refreshed");
        }
        Ok(refreshed)
    }
}

/// Build the Axum router with all routes.
///
/// Shared by the binary and integration tests to keep route composition
/// consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, trace::TraceLayer};

    let cors_layer = build_cors_layer(&state.config);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .merge(api::stamps_router())
        .nest("/api", api::jobs_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
        .merge(api::metrics_router())
}

fn build_cors_layer(config: &config::AppConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !config.server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .federation
        .domains
        .iter()
        .filter_map(|d| HeaderValue::from_str(&config.server.base_url(&d.domain)).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health_check() -> &'static str {
    "OK"
}
