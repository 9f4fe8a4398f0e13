use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::middleware::AuthUser;
use crate::models::{AppState, DocumentListResponse, RejectedFile, UploadResponse};
use crate::queue::JobRecord;
use crate::types::{AppError, AppResult, SourceType};

const MAX_UPLOAD_BYTES: usize = 100 << 20;
const ESTIMATED_SECONDS_PER_FILE: usize = 30;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/documents/upload",
            post(upload_documents).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/documents", get(list_documents))
        .route("/api/documents/{document_id}", delete(delete_document))
}

struct UploadedFile {
    filename: String,
    bytes: Vec<u8>,
}

async fn upload_documents(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let mut source_type: Option<SourceType> = None;
    let mut files: Vec<UploadedFile> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "source_type" => {
                let value = field.text().await.map_err(bad_upload)?;
                source_type = Some(value.parse()?);
            }
            "files[]" | "files" | "file" => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("upload")
                    .to_string();
                let bytes = field.bytes().await.map_err(bad_upload)?;
                files.push(UploadedFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let source_type =
        source_type.ok_or_else(|| AppError::InvalidRequest("Invalid source type".to_string()))?;
    if files.is_empty() {
        return Err(AppError::InvalidRequest("No files uploaded".to_string()));
    }

    // Queued jobs stand even when a later file fails.
    let files_received = files.len();
    let mut job_ids = Vec::with_capacity(files_received);
    let mut failed = Vec::new();
    let mut first_error = None;
    for file in files {
        let job = JobRecord::new(
            Uuid::new_v4().to_string(),
            user.user_id.clone(),
            file.filename,
            source_type,
            file.bytes,
        );
        match state.queue.submit(&job).await {
            Ok(()) => job_ids.push(job.job_id),
            Err(e) => {
                warn!(user_id = %user.user_id, filename = %job.filename, "Could not queue file: {}", e);
                failed.push(RejectedFile {
                    filename: job.filename,
                    error: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    if job_ids.is_empty() {
        if let Some(e) = first_error {
            return Err(e);
        }
    }

    info!(
        user_id = %user.user_id,
        files = files_received,
        queued = job_ids.len(),
        "Accepted upload"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            status: "processing".to_string(),
            files_received,
            estimated_time_seconds: job_ids.len() * ESTIMATED_SECONDS_PER_FILE,
            job_ids,
            failed,
        }),
    ))
}

fn bad_upload(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::InvalidRequest(format!("Failed to parse upload: {}", e))
}

async fn list_documents(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<DocumentListResponse>> {
    let documents = state.documents.list(&user.user_id).await?;
    Ok(Json(DocumentListResponse {
        total: documents.len(),
        documents,
    }))
}

async fn delete_document(
    State(state): State<AppState>,
    user: AuthUser,
    Path(document_id): Path<String>,
) -> AppResult<StatusCode> {
    if !state.documents.delete(&user.user_id, &document_id).await? {
        return Err(AppError::NotFound(format!("document {}", document_id)));
    }

    let removed = state
        .vectors
        .delete_document(&user.user_id, &document_id)
        .await?;
    info!(user_id = %user.user_id, document_id = %document_id, chunks = removed, "Deleted document");

    state.events.document_deleted(&user.user_id, &document_id);
    let remaining = state.documents.list(&user.user_id).await?;
    state.events.documents_updated(&user.user_id, &remaining);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter;
    use crate::models::{Document, DocumentStatus};
    use crate::queue::testing::FaultyStore;
    use crate::queue::JobState;
    use crate::routes::test_support;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "zettelboundary";

    fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Body {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{}\r\n", BOUNDARY));
            match filename {
                Some(f) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/markdown\r\n\r\n",
                    name, f
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
        Body::from(body)
    }

    fn upload(user_id: &str, body: Body) -> Request<Body> {
        Request::post("/api/documents/upload")
            .header(header::AUTHORIZATION, test_support::bearer(user_id))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_queues_one_job_per_file() {
        let state = test_support::state();
        let app = router().with_state(state.clone());

        let body = multipart(&[
            ("source_type", None, "obsidian"),
            ("files[]", Some("a.md"), "# A\n\nfirst"),
            ("files[]", Some("b.md"), "# B\n\nsecond"),
        ]);
        let response = app.oneshot(upload("u1", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = test_support::json(response).await;
        assert_eq!(body["files_received"], 2);
        assert_eq!(body["estimated_time_seconds"], 60);
        assert_eq!(body["status"], "processing");
        let job_ids: Vec<String> = serde_json::from_value(body["job_ids"].clone()).unwrap();
        assert_eq!(job_ids.len(), 2);
        assert_ne!(job_ids[0], job_ids[1]);

        assert_eq!(state.queue.depth().await.unwrap(), 2);
        let status = state.queue.get_status(&job_ids[0], "u1").await.unwrap();
        assert_eq!(status.status, JobState::Pending);

        let raw = state.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        let job = JobRecord::decode(&raw).unwrap();
        assert_eq!(job.job_id, job_ids[0]);
        assert_eq!(job.filename, "a.md");
        assert_eq!(job.source_type, SourceType::Obsidian);
        assert_eq!(job.payload, b"# A\n\nfirst");
    }

    #[tokio::test]
    async fn test_partial_submit_failure_keeps_accepted_ids() {
        let backend = Arc::new(FaultyStore {
            pushes_allowed: Some(1),
            ..FaultyStore::default()
        });
        let state = test_support::state_with_backend(backend);
        let app = router().with_state(state.clone());

        let body = multipart(&[
            ("source_type", None, "obsidian"),
            ("files[]", Some("a.md"), "first"),
            ("files[]", Some("b.md"), "second"),
        ]);
        let response = app.oneshot(upload("u1", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = test_support::json(response).await;
        assert_eq!(body["files_received"], 2);
        let job_ids: Vec<String> = serde_json::from_value(body["job_ids"].clone()).unwrap();
        assert_eq!(job_ids.len(), 1);
        assert_eq!(body["failed"][0]["filename"], "b.md");
        assert_eq!(state.queue.depth().await.unwrap(), 1);

        let raw = state.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(JobRecord::decode(&raw).unwrap().job_id, job_ids[0]);
    }

    #[tokio::test]
    async fn test_upload_fails_when_nothing_is_queued() {
        let backend = Arc::new(FaultyStore {
            pushes_allowed: Some(0),
            ..FaultyStore::default()
        });
        let app = router().with_state(test_support::state_with_backend(backend));

        let body = multipart(&[
            ("source_type", None, "obsidian"),
            ("files[]", Some("a.md"), "first"),
        ]);
        let response = app.oneshot(upload("u1", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_upload_rejects_unknown_source_type() {
        let state = test_support::state();
        let app = router().with_state(state.clone());

        let body = multipart(&[
            ("source_type", None, "evernote"),
            ("files[]", Some("a.md"), "text"),
        ]);
        let response = app.oneshot(upload("u1", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_files_is_400() {
        let app = router().with_state(test_support::state());
        let body = multipart(&[("source_type", None, "notion")]);
        let response = app.oneshot(upload("u1", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_delete_emit_event() {
        let state = test_support::state();
        let (conn, mut outbound) = state.hub.open("u1");
        state.hub.register(conn).await;

        state
            .documents
            .insert(&Document {
                id: "d1".into(),
                user_id: "u1".into(),
                title: "Inbox".into(),
                source_type: SourceType::Standard,
                chunk_count: 0,
                uploaded_at: Utc::now(),
                metadata: Default::default(),
                status: DocumentStatus::Completed,
            })
            .await
            .unwrap();

        let app = router().with_state(state.clone());
        let listed = app
            .clone()
            .oneshot(test_support::get("/api/documents", "u1"))
            .await
            .unwrap();
        let body = test_support::json(listed).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["documents"][0]["id"], "d1");

        let request = Request::delete("/api/documents/d1")
            .header(header::AUTHORIZATION, test_support::bearer("u1"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        state.hub.stats().await;
        let event = outbound.try_recv().unwrap();
        assert_eq!(event.kind, emitter::DOCUMENT_DELETED);
        assert_eq!(event.payload["document_id"], "d1");
        let event = outbound.try_recv().unwrap();
        assert_eq!(event.kind, emitter::DOCUMENTS_UPDATED);
        assert_eq!(event.payload["documents"], serde_json::json!([]));

        let request = Request::delete("/api/documents/d1")
            .header(header::AUTHORIZATION, test_support::bearer("u1"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
