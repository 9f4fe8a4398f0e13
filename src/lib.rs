// Zettel Ingest - document ingestion queue with real-time job events

pub mod config;
pub mod db;
pub mod embeddings;
pub mod events;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod routes;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
