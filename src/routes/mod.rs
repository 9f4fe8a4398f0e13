//! API Routes
//!
//! - `/api/documents` - Upload, list and delete documents
//! - `/api/jobs/{job_id}` - Job status
//! - `/api/events/ws` - Real-time job/document events over WebSocket
//! - `/api/health` - Health checks

pub mod documents;
pub mod events;
pub mod health;
pub mod jobs;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server);

    Router::new()
        .merge(documents::router())
        .merge(jobs::router())
        .merge(events::router())
        .merge(health::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use axum::response::Response;
    use std::sync::Arc;

    use crate::config::{
        AuthConfig, Config, DatabaseConfig, EmbeddingConfig, HubConfig, QueueConfig, RedisConfig,
        ServerConfig,
    };
    use crate::db::InMemoryDocumentStore;
    use crate::embeddings::InMemoryVectorIndex;
    use crate::events::{EventEmitter, EventHub};
    use crate::middleware::issue_jwt;
    use crate::models::AppState;
    use crate::queue::{JobQueue, QueueBackend};

    pub const SECRET: &str = "test-secret";

    pub fn config() -> Config {
        Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".into(),
                cors_allowed_origins: vec!["*".into()],
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 1,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: String::new(),
                enabled: false,
            },
            queue: QueueConfig::default(),
            hub: HubConfig::default(),
            auth: AuthConfig {
                jwt_secret: SECRET.into(),
            },
            embedding: EmbeddingConfig {
                openai_api_key: String::new(),
                model: String::new(),
                api_url: String::new(),
            },
        }
    }

    pub fn state() -> AppState {
        state_with_backend(Arc::new(crate::queue::MemoryStore::new()))
    }

    pub fn state_with_backend(backend: Arc<dyn QueueBackend>) -> AppState {
        let config = config();
        let (hub, _task) = EventHub::spawn(&config.hub);
        AppState {
            queue: JobQueue::new(backend, config.queue.clone()),
            events: EventEmitter::new(hub.clone()),
            hub,
            documents: Arc::new(InMemoryDocumentStore::new()),
            vectors: Arc::new(InMemoryVectorIndex::new()),
            config,
        }
    }

    pub fn bearer(user_id: &str) -> String {
        let token = issue_jwt(user_id, SECRET, chrono::Duration::hours(1)).unwrap();
        format!("Bearer {}", token)
    }

    pub fn get(uri: &str, user_id: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, bearer(user_id))
            .body(Body::empty())
            .unwrap()
    }

    pub async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
