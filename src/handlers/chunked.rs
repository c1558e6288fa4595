//! HTTP surface for the chunked ingestion core (spec.md §6). Grounded on the
//! teacher's `upload_artifact`/`upload_progress` handler pairs: thin Axum
//! handlers that extract the authenticated identity, translate the wire body
//! into a use-case request, call straight through to the core component, and
//! map its `Result` into the shared JSON error shape. No business logic
//! lives here — every invariant is enforced inside `ingestion`.

use crate::app_state::AppState;
use crate::auth::AuthenticatedPrincipal;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use axum::response::IntoResponse;
use ingestion::progress_bus::SessionInfo;
use ingestion::pipeline::Pipeline;
use ingestion::upload_session::{InitRequest, UploadMetadata};
use kernel::{FileId, IngestionError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitBody {
    pub file_id: Option<String>,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: Option<String>,
    pub tool_resource: Option<String>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitSession {
    start_time: OffsetDateTime,
    temp_dir: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    success: bool,
    file_id: FileId,
    total_chunks: u64,
    chunk_size: u64,
    session: InitSession,
}

/// `POST /init` — creates (or resets, if the caller's `fileId` names a
/// terminal session) an upload session and the pipeline it will drive.
pub async fn init(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(body): Json<InitBody>,
) -> Result<impl IntoResponse, IngestionError> {
    let req = InitRequest {
        file_id: body.file_id,
        file_name: body.file_name,
        total_size: body.file_size,
        checksum: None,
        metadata: UploadMetadata {
            tool_resource: body.tool_resource,
            content_type: body.file_type,
            agent_id: body.agent_id,
        },
    };

    let result = state.upload_sessions.init(principal.id.clone(), req).await?;
    let temp_dir = format!("{}/temp/chunks/{}/{}", state.uploads_path, principal.id, result.file_id);

    Ok(Json(InitResponse {
        success: true,
        file_id: result.file_id,
        total_chunks: result.total_chunks,
        chunk_size: result.chunk_size,
        session: InitSession { start_time: OffsetDateTime::now_utc(), temp_dir },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadChunkResponse {
    success: bool,
    progress: f64,
    received_chunks: u64,
    total_chunks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    already_received: Option<bool>,
}

/// `POST /upload/:fileId/:chunkIndex` — multipart field `chunk` carries the
/// raw bytes, optional form field `chunkHash` carries the client's digest.
pub async fn upload_chunk(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path((file_id, chunk_index)): Path<(String, u64)>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, IngestionError> {
    let mut chunk_bytes = None;
    let mut chunk_hash = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or("") {
            "chunk" => chunk_bytes = Some(field.bytes().await.map_err(multipart_error)?),
            "chunkHash" => {
                let data = field.bytes().await.map_err(multipart_error)?;
                chunk_hash = std::str::from_utf8(&data).ok().map(str::to_string);
            }
            _ => {}
        }
    }

    let chunk_bytes = chunk_bytes
        .ok_or_else(|| IngestionError::BadIndex("missing multipart field \"chunk\"".to_string()))?;

    let file_id = FileId::from(file_id);
    let result =
        state.upload_sessions.upload_chunk(&file_id, &principal.id, chunk_index, chunk_bytes, chunk_hash).await?;

    Ok(Json(UploadChunkResponse {
        success: true,
        progress: result.progress,
        received_chunks: result.received_chunks,
        total_chunks: result.total_chunks,
        already_received: result.already_received.then_some(true),
    }))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> IngestionError {
    IngestionError::BadIndex(format!("malformed multipart body: {err}"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResumeResponse {
    file_id: FileId,
    total_chunks: u64,
    received_chunks: Vec<u64>,
    missing_chunks: Vec<u64>,
    progress: f64,
}

/// `GET /resume/:fileId` — reconciles the session against the chunk store
/// and reports what's still missing. Safe to call at any time.
pub async fn resume(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, IngestionError> {
    let file_id = FileId::from(file_id);
    let result = state.upload_sessions.resume(&file_id, &principal.id).await?;
    let total_chunks = result.received_indices.len() as u64 + result.missing_indices.len() as u64;
    let progress =
        if total_chunks == 0 { 1.0 } else { result.received_indices.len() as f64 / total_chunks as f64 };

    Ok(Json(ResumeResponse {
        file_id,
        total_chunks,
        received_chunks: result.received_indices,
        missing_chunks: result.missing_indices,
        progress,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBody {
    pub final_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    success: bool,
    file_path: String,
    size: u64,
}

/// `POST /complete/:fileId` — assembles the received chunks and runs the
/// post-assembly pipeline stages. `finalPath` is confined under
/// `UPLOADS_PATH/assembled` by `UploadSessionManager` (spec.md §9).
pub async fn complete(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(file_id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> Result<impl IntoResponse, IngestionError> {
    let file_id = FileId::from(file_id);
    let result = state.upload_sessions.assemble(&file_id, &principal.id, Some(body.final_path.as_str())).await?;
    Ok(Json(CompleteResponse { success: true, file_path: result.path, size: result.size }))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    success: bool,
    message: &'static str,
}

/// `DELETE /:fileId` — purges chunks, tears down the pipeline, and emits a
/// terminal non-retryable error event.
pub async fn cancel(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, IngestionError> {
    let file_id = FileId::from(file_id);
    state.upload_sessions.cancel(&file_id, &principal.id).await?;
    Ok(Json(CancelResponse { success: true, message: "Upload cancelled" }))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    success: bool,
    session: Option<SessionInfo>,
    pipeline: Option<Pipeline>,
}

/// `GET /status/:fileId` — the last-known `ProgressBus` snapshot plus the
/// pipeline's current state; 404 if neither is tracked for this caller.
pub async fn status(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, IngestionError> {
    let file_id = FileId::from(file_id);

    let session = state.progress_bus.session_status(&file_id).filter(|s| s.principal_id == principal.id);
    let pipeline = state.pipeline.status(&file_id).filter(|p| p.owner_id == principal.id);

    if session.is_none() && pipeline.is_none() {
        return Err(IngestionError::NotFound(format!("no session or pipeline tracked for file {file_id}")));
    }

    Ok(Json(StatusResponse { success: true, session, pipeline }))
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    success: bool,
    valid: bool,
}

/// `POST /validate/:fileId` — re-digests every chunk the client supplied a
/// `chunkHash` for and compares it to the recorded value.
pub async fn validate(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, IngestionError> {
    let file_id = FileId::from(file_id);
    let valid = state.upload_sessions.validate(&file_id, &principal.id).await?;
    Ok(Json(ValidateResponse { success: true, valid }))
}
