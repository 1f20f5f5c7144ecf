//! Common test utilities for E2E tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use badgeharbor::jobs::{Dispatcher, JobRunner};
use badgeharbor::{config, AppState};
use tempfile::TempDir;
use tokio::net::TcpListener;

static METRICS_INIT: Once = Once::new();

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server serving the domain "b.example"
    pub async fn new() -> Self {
        METRICS_INIT.call_once(badgeharbor::metrics::init_metrics);

        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            federation: config::FederationConfig {
                domains: vec![config::DomainConfig {
                    domain: "b.example".to_string(),
                    default_actor: "badges".to_string(),
                    relay_actor: None,
                }],
                key_bits: 2048,
            },
            jobs: config::JobsConfig {
                poll_interval_seconds: 60,
                batch_size: 5,
                max_retries: 5,
            },
            cache: config::CacheConfig {
                actor_ttl: 3600,
                actor_max_entries: 64,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = badgeharbor::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Run one job runner cycle, the way the polling loop would.
    pub async fn run_cycle(&self) {
        let dispatcher = Arc::new(Dispatcher::new(
            self.state.db.clone(),
            self.state.config.clone(),
            self.state.http_client.clone(),
            self.state.actor_cache.clone(),
        ));
        let runner = JobRunner::new(self.state.db.clone(), self.state.config.clone(), dispatcher);
        runner.run_cycle().await.unwrap();
    }

    /// POST a signed-looking activity to the shared inbox.
    ///
    /// Inbound signature verification is out of scope for the boundary; it
    /// only checks that a Signature header is present.
    pub async fn post_inbox(&self, activity: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/inbox"))
            .header("Content-Type", "application/activity+json")
            .header("Signature", "keyId=\"test\",signature=\"test\"")
            .json(activity)
            .send()
            .await
            .unwrap()
    }
}

/// Captured inbox delivery on a mock remote peer
#[derive(Debug, Clone)]
pub struct CapturedDelivery {
    pub path: String,
    pub body: serde_json::Value,
}

#[derive(Clone, Default)]
struct PeerState {
    base: Arc<Mutex<String>>,
    deliveries: Arc<Mutex<Vec<CapturedDelivery>>>,
    objects: Arc<Mutex<HashMap<String, serde_json::Value>>>,
}

/// Mock remote ActivityPub server
///
/// Serves actor documents and arbitrary objects, and records everything
/// POSTed to its inboxes.
pub struct RemotePeer {
    pub addr: String,
    state: PeerState,
}

impl RemotePeer {
    pub async fn start() -> Self {
        use axum::extract::{Path, State};
        use axum::routing::{get, post};
        use axum::Json;

        let state = PeerState::default();

        async fn actor(
            State(peer): State<PeerState>,
            Path(name): Path<String>,
        ) -> Json<serde_json::Value> {
            let base = peer.base.lock().unwrap().clone();
            Json(serde_json::json!({
                "@context": "https://www.w3.org/ns/activitystreams",
                "type": "Person",
                "id": format!("{}/users/{}", base, name),
                "preferredUsername": name,
                "name": format!("{} (remote)", name),
                "inbox": format!("{}/users/{}/inbox", base, name),
                "endpoints": { "sharedInbox": format!("{}/inbox", base) },
                "publicKey": {
                    "id": format!("{}/users/{}#main-key", base, name),
                    "publicKeyPem": "-----BEGIN PUBLIC KEY-----\ntest\n-----END PUBLIC KEY-----"
                }
            }))
        }

        async fn personal_inbox(
            State(peer): State<PeerState>,
            Path(name): Path<String>,
            Json(body): Json<serde_json::Value>,
        ) -> axum::http::StatusCode {
            peer.deliveries.lock().unwrap().push(CapturedDelivery {
                path: format!("/users/{}/inbox", name),
                body,
            });
            axum::http::StatusCode::ACCEPTED
        }

        async fn shared_inbox(
            State(peer): State<PeerState>,
            Json(body): Json<serde_json::Value>,
        ) -> axum::http::StatusCode {
            peer.deliveries.lock().unwrap().push(CapturedDelivery {
                path: "/inbox".to_string(),
                body,
            });
            axum::http::StatusCode::ACCEPTED
        }

        async fn object(
            State(peer): State<PeerState>,
            Path(key): Path<String>,
        ) -> Result<Json<serde_json::Value>, axum::http::StatusCode> {
            peer.objects
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .map(Json)
                .ok_or(axum::http::StatusCode::NOT_FOUND)
        }

        let app = axum::Router::new()
            .route("/users/:name", get(actor))
            .route("/users/:name/inbox", post(personal_inbox))
            .route("/inbox", post(shared_inbox))
            .route("/objects/:key", get(object))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        *state.base.lock().unwrap() = addr.clone();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        Self { addr, state }
    }

    /// URI of an actor hosted on this peer.
    pub fn actor_uri(&self, name: &str) -> String {
        format!("{}/users/{}", self.addr, name)
    }

    /// Personal inbox URI of an actor hosted on this peer.
    pub fn inbox_uri(&self, name: &str) -> String {
        format!("{}/users/{}/inbox", self.addr, name)
    }

    /// Publish an object under /objects/:key and return its URI.
    pub fn publish_object(&self, key: &str, mut object: serde_json::Value) -> String {
        let uri = format!("{}/objects/{}", self.addr, key);
        object["id"] = serde_json::json!(uri);
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), object);
        uri
    }

    /// All deliveries captured so far.
    pub fn deliveries(&self) -> Vec<CapturedDelivery> {
        self.state.deliveries.lock().unwrap().clone()
    }

    /// Deliveries whose activity type matches.
    pub fn deliveries_of_type(&self, activity_type: &str) -> Vec<CapturedDelivery> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.body["type"] == activity_type)
            .collect()
    }
}
