//! Remote actor resolution
//!
//! Fetches remote ActivityPub actor documents and caches the parts we need
//! (inbox endpoints, profile fields) to keep federation chatter down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::AppError;
use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

/// Profile and endpoint data extracted from a remote actor document
#[derive(Debug, Clone)]
pub struct RemoteActor {
    /// Canonical actor URI
    pub id: String,
    /// preferredUsername
    pub preferred_username: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Personal inbox URI
    pub inbox: String,
    /// Shared inbox URI, if the server advertises one
    pub shared_inbox: Option<String>,
    /// Avatar URL
    pub icon_url: Option<String>,
    /// PEM-encoded public key
    pub public_key_pem: Option<String>,
}

/// Fetch and parse a remote actor document.
pub async fn fetch_remote_actor(
    actor_uri: &str,
    http_client: &reqwest::Client,
) -> Result<RemoteActor, AppError> {
    let response = http_client
        .get(actor_uri)
        .header("Accept", "application/activity+json")
        .send()
        .await
        .map_err(|e| AppError::Federation(format!("Failed to fetch actor {}: {}", actor_uri, e)))?;

    if !response.status().is_success() {
        return Err(AppError::Federation(format!(
            "Actor fetch {} returned HTTP {}",
            actor_uri,
            response.status()
        )));
    }

    let document: serde_json::Value = response.json().await.map_err(|e| {
        AppError::Federation(format!("Invalid actor document from {}: {}", actor_uri, e))
    })?;

    parse_remote_actor(&document)
}

/// Extract the fields we use from an actor document.
pub fn parse_remote_actor(document: &serde_json::Value) -> Result<RemoteActor, AppError> {
    let id = document["id"]
        .as_str()
        .ok_or_else(|| AppError::Federation("Actor document missing id".to_string()))?
        .to_string();

    let inbox = document["inbox"]
        .as_str()
        .ok_or_else(|| AppError::Federation("Actor document missing inbox".to_string()))?
        .to_string();

    Ok(RemoteActor {
        id,
        preferred_username: document["preferredUsername"].as_str().map(String::from),
        display_name: document["name"].as_str().map(String::from),
        inbox,
        shared_inbox: document["endpoints"]["sharedInbox"]
            .as_str()
            .map(String::from),
        icon_url: document["icon"]["url"].as_str().map(String::from),
        public_key_pem: document["publicKey"]["publicKeyPem"]
            .as_str()
            .map(String::from),
    })
}

/// Fetch an arbitrary ActivityPub object (note, activity) by URI.
pub async fn fetch_remote_object(
    object_uri: &str,
    http_client: &reqwest::Client,
) -> Result<serde_json::Value, AppError> {
    let response = http_client
        .get(object_uri)
        .header("Accept", "application/activity+json")
        .send()
        .await
        .map_err(|e| {
            AppError::Federation(format!("Failed to fetch object {}: {}", object_uri, e))
        })?;

    if !response.status().is_success() {
        return Err(AppError::Federation(format!(
            "Object fetch {} returned HTTP {}",
            object_uri,
            response.status()
        )));
    }

    response.json().await.map_err(|e| {
        AppError::Federation(format!("Invalid object document from {}: {}", object_uri, e))
    })
}

/// Cached actor entry
#[derive(Debug, Clone)]
struct CachedActor {
    actor: RemoteActor,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedActor {
    fn is_valid(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Remote actor cache
///
/// Thread-safe TTL cache keyed by actor URI. Bounded: when full, inserting
/// evicts the oldest entry rather than growing without limit.
pub struct RemoteActorCache {
    cache: Arc<RwLock<HashMap<String, CachedActor>>>,
    http_client: Arc<reqwest::Client>,
    default_ttl: Duration,
    max_entries: usize,
}

impl RemoteActorCache {
    /// Create new actor cache
    pub fn new(
        http_client: Arc<reqwest::Client>,
        default_ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            http_client,
            default_ttl,
            max_entries,
        }
    }

    /// Get a remote actor, fetching on miss or expiry.
    pub async fn get(&self, actor_uri: &str) -> Result<RemoteActor, AppError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(actor_uri) {
                if cached.is_valid() {
                    CACHE_HITS_TOTAL.with_label_values(&["remote_actor"]).inc();
                    tracing::debug!("Actor cache hit for {}", actor_uri);
                    return Ok(cached.actor.clone());
                }
                tracing::debug!("Actor cache expired for {}", actor_uri);
            }
        }

        CACHE_MISSES_TOTAL
            .with_label_values(&["remote_actor"])
            .inc();
        tracing::debug!("Actor cache miss for {}, fetching...", actor_uri);
        let actor = fetch_remote_actor(actor_uri, &self.http_client).await?;

        {
            let mut cache = self.cache.write().await;
            if cache.len() >= self.max_entries && !cache.contains_key(actor_uri) {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, v)| v.cached_at)
                    .map(|(k, _)| k.clone());
                if let Some(key) = oldest {
                    cache.remove(&key);
                }
            }
            cache.insert(
                actor_uri.to_string(),
                CachedActor {
                    actor: actor.clone(),
                    cached_at: Instant::now(),
                    ttl: self.default_ttl,
                },
            );
        }

        Ok(actor)
    }

    /// Invalidate a cached actor
    pub async fn invalidate(&self, actor_uri: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(actor_uri);
        tracing::debug!("Invalidated actor cache for {}", actor_uri);
    }

    /// Prune expired entries
    pub async fn prune_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, v| v.is_valid());
        let removed = before - cache.len();

        if removed > 0 {
            tracing::info!("Pruned {} expired actor cache entries", removed);
        }
    }

    /// Number of cached entries (valid or not)
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    #[cfg(test)]
    async fn insert_for_test(&self, uri: &str, actor: RemoteActor, ttl: Duration) {
        let mut cache = self.cache.write().await;
        cache.insert(
            uri.to_string(),
            CachedActor {
                actor,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }
}
