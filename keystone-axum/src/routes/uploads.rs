use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, Path, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use keystone_staging::{
    CancellationToken, CleanupCounts, CleanupReport, CommitOutcome, FileOutcome, FileUpload,
    ParentRef, PreserveList, SessionId, UploadBatch, UploadSession, UploadOptions,
    UploadedFileReference,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{map_json_rejection, ApiAxumError, ApiError, ErrorKind};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", get(show_session).delete(close_session))
        .route("/sessions/{id}/files", post(upload_files))
        .route("/sessions/{id}/commit", post(commit_files))
        .route("/sessions/{id}/cleanup", post(cleanup_files))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenSession {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    session_id: SessionId,
    created_at: i64,
    pending_count: usize,
    files: Vec<UploadedFileReference>,
}

impl From<&UploadSession> for SessionView {
    fn from(session: &UploadSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            created_at: session.created_at,
            pending_count: session.pending_count(),
            files: session.files.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum FileOutcomeView {
    Accepted { file: UploadedFileReference },
    Rejected { name: String, reason: String },
    Failed { name: String, error: String },
    Cancelled { name: String },
}

impl From<FileOutcome> for FileOutcomeView {
    fn from(outcome: FileOutcome) -> Self {
        match outcome {
            FileOutcome::Accepted(file) => Self::Accepted { file },
            FileOutcome::Rejected { name, reason } => Self::Rejected {
                name,
                reason: reason.to_string(),
            },
            FileOutcome::Failed { name, error } => Self::Failed { name, error },
            FileOutcome::Cancelled { name } => Self::Cancelled { name },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchView {
    accepted_urls: Vec<String>,
    rejected_count: usize,
    failed_count: usize,
    cancelled_count: usize,
    files: Vec<FileOutcomeView>,
}

impl From<UploadBatch> for BatchView {
    fn from(batch: UploadBatch) -> Self {
        Self {
            accepted_urls: batch.accepted_urls(),
            rejected_count: batch.rejected_count(),
            failed_count: batch.failed_count(),
            cancelled_count: batch.cancelled_count(),
            files: batch.outcomes.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest {
    urls: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitView {
    committed_urls: Vec<String>,
    unknown_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ledger_error: Option<String>,
}

impl From<CommitOutcome> for CommitView {
    fn from(outcome: CommitOutcome) -> Self {
        Self {
            committed_urls: outcome.committed,
            unknown_urls: outcome.unknown,
            ledger_error: outcome.ledger_error,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupRequest {
    #[serde(default)]
    preserve_urls: Vec<String>,
    /// Gallery whose live entries are also preserved
    parent: Option<ParentRef>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupView {
    #[serde(flatten)]
    counts: CleanupCounts,
    deleted_urls: Vec<String>,
    failed_urls: Vec<String>,
}

impl From<CleanupReport> for CleanupView {
    fn from(report: CleanupReport) -> Self {
        Self {
            counts: report.counts(),
            deleted_urls: report.deleted_urls(),
            failed_urls: report.failed.into_iter().map(|f| f.url).collect(),
        }
    }
}

/// A JSON body that may be left out entirely
fn optional_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiAxumError> {
    match body {
        Ok(Json(body)) => Ok(body),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(map_json_rejection(rejection)),
    }
}

fn map_multipart_error(err: MultipartError) -> ApiAxumError {
    let kind = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ErrorKind::PayloadTooLarge
    } else {
        ErrorKind::BadRequest
    };
    ApiError::new(kind, err.body_text()).into()
}

async fn open_session(
    State(state): State<AppState>,
    body: Result<Json<OpenSession>, JsonRejection>,
) -> Result<(StatusCode, Json<SessionView>), ApiAxumError> {
    let request = optional_body(body)?;
    let session = match request.session_id.map(SessionId::from_string) {
        // adopted ids end up in storage keys
        Some(id) if !id.is_well_formed() => {
            return Err(ApiError::bad_request(format!(
                "sessionId must be 1 to {} ascii letters, digits, '-' or '_'",
                SessionId::MAX_LEN
            ))
            .with_errors(json!({"sessionId": ["malformed"]}))
            .into())
        }
        Some(id) => state.coordinator.resume(id),
        None => state.coordinator.begin(),
    };
    let view = SessionView::from(&session);
    state.sessions.open(session)?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn show_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiAxumError> {
    let shared = state.sessions.get(&SessionId::from_string(id))?;
    let session = shared.lock().await;
    Ok(Json(SessionView::from(&*session)))
}

/// Forget a session. Refused while it still holds pending files.
async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiAxumError> {
    let id = SessionId::from_string(id);
    let shared = state.sessions.get(&id)?;
    let session = shared.lock().await;
    if !session.is_settled() {
        return Err(ApiError::conflict(format!(
            "session {} still has {} pending files; commit or clean them up first",
            id,
            session.pending_count()
        ))
        .into());
    }
    state.sessions.retire(&id);
    Ok(StatusCode::NO_CONTENT)
}

async fn upload_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchView>, ApiAxumError> {
    let shared = state.sessions.get(&SessionId::from_string(id))?;
    let mut multipart = multipart.map_err(|r| ApiAxumError::from(ApiError::bad_request(r.body_text())))?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(map_multipart_error)? {
        // text fields carry nothing we stage
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(map_multipart_error)?;
        let mut file = FileUpload::new(name, data);
        if let Some(ct) = content_type {
            file = file.with_content_type(ct);
        }
        files.push(file);
    }

    if files.is_empty() {
        return Err(ApiError::unprocessable("No files in request")
            .with_errors(json!({"files": ["at least one file is required"]}))
            .into());
    }
    debug!(files = files.len(), "multipart upload received");

    // A dropped request cancels the transfers still running; the task keeps
    // the session lock until every finished file is tracked.
    let cancel = CancellationToken::new();
    let _cancel_on_disconnect = cancel.clone().drop_guard();
    let coordinator = Arc::clone(&state.coordinator);
    let task = tokio::spawn(async move {
        let mut session = shared.lock_owned().await;
        coordinator
            .upload(&mut session, files, UploadOptions::new().with_cancel(cancel))
            .await
    });

    let batch = task
        .await
        .map_err(|e| ApiError::general_error(format!("upload task failed: {e}")))??;
    Ok(Json(BatchView::from(batch)))
}

async fn commit_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CommitRequest>, JsonRejection>,
) -> Result<Json<CommitView>, ApiAxumError> {
    let request = optional_body(body)?;
    let shared = state.sessions.get(&SessionId::from_string(id))?;
    let mut session = shared.lock().await;

    let outcome = state
        .coordinator
        .commit(&mut session, request.urls.as_deref())
        .await;
    Ok(Json(CommitView::from(outcome)))
}

async fn cleanup_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CleanupRequest>, JsonRejection>,
) -> Result<Json<CleanupView>, ApiAxumError> {
    let request = optional_body(body)?;
    let shared = state.sessions.get(&SessionId::from_string(id))?;

    let mut preserve = PreserveList::from_urls(request.preserve_urls);
    if let Some(parent) = &request.parent {
        // without the live gallery nothing may be deleted
        preserve.merge(PreserveList::for_parent(state.gallery.as_ref(), parent).await?);
    }

    let mut session = shared.lock().await;
    let report = state.coordinator.cleanup(&mut session, &preserve).await;
    Ok(Json(CleanupView::from(report)))
}
