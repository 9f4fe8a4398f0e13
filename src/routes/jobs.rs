use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::middleware::AuthUser;
use crate::models::AppState;
use crate::queue::JobStatusView;
use crate::types::AppResult;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/jobs/{job_id}", get(get_job_status))
}

async fn get_job_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobStatusView>> {
    let view = state.queue.get_status(&job_id, &user.user_id).await?;
    Ok(Json(view))
}
