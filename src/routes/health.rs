use axum::{extract::State, routing::get, Json, Router};
use tracing::warn;

use crate::models::{AppState, HealthResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, queue_depth) = match state.queue.depth().await {
        Ok(depth) => ("ok", Some(depth)),
        Err(e) => {
            warn!("Health check could not reach the queue: {}", e);
            ("degraded", None)
        }
    };
    let hub = state.hub.stats().await;

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        queue_backend: state.queue.backend_name().to_string(),
        queue_depth,
        connected_users: hub.users,
        connections: hub.connections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_queue_and_hub() {
        let state = test_support::state();
        let (conn, _outbound) = state.hub.open("u1");
        state.hub.register(conn).await;

        let app = router().with_state(state);
        let response = app
            .oneshot(test_support::get("/api/health", "u1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = test_support::json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["queue_backend"], "memory");
        assert_eq!(body["queue_depth"], 0);
        assert_eq!(body["connected_users"], 1);
        assert_eq!(body["connections"], 1);
    }
}
