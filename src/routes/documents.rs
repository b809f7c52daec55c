use std::{path::Path as FsPath, time::Duration};

use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::jobs::{enqueue_job, JOB_INGEST_DOCUMENT};
use crate::models::{
    Document, DocumentChunk, NewDocument, DOC_STATUS_FAILED, DOC_STATUS_PENDING,
    DOC_STATUS_PROCESSING,
};
use crate::schema::{document_chunks, documents, users};
use crate::state::AppState;

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;
const DEFAULT_RECENT_LIMIT: i64 = 10;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "txt", "md", "csv", "xls", "xlsx", "ppt", "pptx", "jpg", "jpeg", "png",
];

#[derive(Deserialize)]
pub struct DocumentListQuery {
    pub status: Option<String>,
    pub file_type: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct DocumentListItem {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub owner: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_accessed: Option<String>,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub original_name: String,
    pub owner: String,
    pub uploaded_by: Uuid,
    pub size: i64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub status: String,
    pub content: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_accessed: Option<String>,
}

#[derive(Serialize)]
pub struct ChunkResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub embedding: Value,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

struct UploadRequest {
    bytes: Vec<u8>,
    original_name: String,
    content_type: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentListItem>>> {
    let mut conn = state.db()?;

    let mut query = documents::table
        .inner_join(users::table)
        .select((documents::all_columns, users::email))
        .into_boxed();

    if !user.role.sees_all_documents() {
        query = query.filter(documents::uploaded_by.eq(user.user_id));
    }

    if let Some(status) = params.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(documents::status.eq(status.to_lowercase()));
    }

    if let Some(file_type) = params
        .file_type
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        query = query.filter(documents::file_type.eq(file_type.to_lowercase()));
    }

    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
        query = query.filter(
            documents::title
                .ilike(pattern.clone())
                .or(documents::description.ilike(pattern)),
        );
    }

    query = match params.ordering.as_deref().unwrap_or("-created_at") {
        "created_at" => query.order(documents::created_at.asc()),
        "-created_at" => query.order(documents::created_at.desc()),
        "updated_at" => query.order(documents::updated_at.asc()),
        "-updated_at" => query.order(documents::updated_at.desc()),
        "last_accessed" => query.order(documents::last_accessed.asc()),
        "-last_accessed" => query.order(documents::last_accessed.desc()),
        "title" => query.order(documents::title.asc()),
        "-title" => query.order(documents::title.desc()),
        other => {
            return Err(AppError::bad_request(format!(
                "unsupported ordering '{other}'"
            )))
        }
    };

    let rows: Vec<(Document, String)> = query.load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(doc, owner)| to_list_item(doc, owner))
            .collect(),
    ))
}

pub async fn recent_documents(
    State(state): State<AppState>,
    Query(params): Query<RecentQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentListItem>>> {
    let limit = params
        .limit
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_RECENT_LIMIT);

    let mut conn = state.db()?;

    let mut query = documents::table
        .inner_join(users::table)
        .select((documents::all_columns, users::email))
        .filter(documents::last_accessed.is_not_null())
        .into_boxed();

    if !user.role.sees_all_documents() {
        query = query.filter(documents::uploaded_by.eq(user.user_id));
    }

    let rows: Vec<(Document, String)> = query
        .order(documents::last_accessed.desc())
        .limit(limit)
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(doc, owner)| to_list_item(doc, owner))
            .collect(),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let doc = fetch_scoped_document(&mut conn, &user, document_id)?;

    // Viewing a document records the access time. Concurrent reads race
    // harmlessly; last write wins.
    let now = Utc::now().naive_utc();
    diesel::update(documents::table.find(doc.id))
        .set(documents::last_accessed.eq(Some(now)))
        .execute(&mut conn)?;

    let owner: String = users::table
        .find(doc.uploaded_by)
        .select(users::email)
        .first(&mut conn)?;

    let mut doc = doc;
    doc.last_accessed = Some(now);
    Ok(Json(to_detail_response(doc, owner)))
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    if !user.role.can_upload() {
        return Err(AppError::forbidden(
            "you do not have permission to upload documents",
        ));
    }

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                original_name = field.file_name().map(|n| n.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    let msg = format!("failed to read file bytes: {err}");
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(msg)
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("title") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid title: {err}")))?;
                if !value.trim().is_empty() {
                    title = Some(value.trim().to_string());
                }
            }
            Some("description") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(format!("invalid description: {err}")))?;
                if !value.trim().is_empty() {
                    description = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;
    if file_bytes.is_empty() {
        error!("upload rejected: empty file payload");
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let original_name = original_name
        .ok_or_else(|| AppError::bad_request("filename is required"))?;

    let request = UploadRequest {
        bytes: file_bytes,
        original_name,
        content_type,
        title,
        description,
    };

    let response = process_upload(&state, request, &user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    if !user.role.can_upload() {
        return Err(AppError::forbidden(
            "you do not have permission to delete documents",
        ));
    }

    let mut conn = state.db()?;
    let doc: Document = documents::table.find(document_id).first(&mut conn)?;

    if !user.role.is_admin() && doc.uploaded_by != user.user_id {
        return Err(AppError::forbidden(
            "you do not have permission to delete this document",
        ));
    }

    // Chunk rows go with the document (FK cascade); the payload object is
    // removed best-effort after the row.
    diesel::delete(documents::table.find(document_id)).execute(&mut conn)?;
    drop(conn);

    if let Err(err) = state.storage.delete_object(&doc.storage_key).await {
        warn!(document_id = %document_id, error = %err, "failed to delete stored payload");
    }

    info!(document_id = %document_id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentDownloadResponse>> {
    let mut conn = state.db()?;
    let doc = fetch_scoped_document(&mut conn, &user, document_id)?;
    drop(conn);

    let presigned_url = state
        .storage
        .presign_get_object(
            &doc.storage_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    let content_type = mime_guess::from_path(&doc.original_name)
        .first()
        .map(|mime| mime.to_string());

    Ok(Json(DocumentDownloadResponse {
        url: presigned_url,
        expires_in: PRESIGNED_URL_EXPIRY_SECONDS,
        filename: doc.original_name,
        content_type,
        size_bytes: doc.file_size,
    }))
}

pub async fn list_chunks(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ChunkResponse>>> {
    let mut conn = state.db()?;
    let doc = fetch_scoped_document(&mut conn, &user, document_id)?;

    let chunks: Vec<DocumentChunk> = document_chunks::table
        .filter(document_chunks::document_id.eq(doc.id))
        .order(document_chunks::chunk_index.asc())
        .load(&mut conn)?;

    Ok(Json(
        chunks
            .into_iter()
            .map(|chunk| ChunkResponse {
                id: chunk.id,
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
                chunk_text: chunk.chunk_text,
                embedding: chunk.embedding,
                created_at: super::users::to_iso(chunk.created_at),
            })
            .collect(),
    ))
}

pub async fn trigger_ingestion(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let mut conn = state.db()?;
    let doc = fetch_scoped_document(&mut conn, &user, document_id)?;

    if doc.status != DOC_STATUS_PENDING && doc.status != DOC_STATUS_FAILED {
        return Err(AppError::conflict(format!(
            "cannot trigger ingestion for document with status '{}'",
            doc.status
        )));
    }

    // The conditional update is the single-flight guard: of two concurrent
    // triggers only one matches a pending/failed row.
    let now = Utc::now().naive_utc();
    let transitioned = diesel::update(
        documents::table
            .find(document_id)
            .filter(documents::status.eq_any([DOC_STATUS_PENDING, DOC_STATUS_FAILED])),
    )
    .set((
        documents::status.eq(DOC_STATUS_PROCESSING),
        documents::updated_at.eq(now),
    ))
    .execute(&mut conn)?;

    if transitioned == 0 {
        return Err(AppError::conflict(
            "ingestion is already in progress for this document",
        ));
    }

    enqueue_job(
        &mut conn,
        JOB_INGEST_DOCUMENT,
        json!({ "document_id": document_id }),
        None,
    )
    .map_err(|err| AppError::internal(format!("failed to enqueue ingest job: {err}")))?;

    info!(document_id = %document_id, "ingestion triggered");
    Ok(Json(json!({ "status": "ingestion started" })))
}

async fn process_upload(
    state: &AppState,
    request: UploadRequest,
    user: &AuthenticatedUser,
) -> AppResult<DocumentResponse> {
    let UploadRequest {
        bytes,
        original_name,
        content_type,
        title,
        description,
    } = request;

    let extension = file_extension(&original_name).ok_or_else(|| {
        AppError::bad_request(format!(
            "unsupported file extension. Allowed extensions are: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))
    })?;

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::bad_request(format!(
            "unsupported file extension. Allowed extensions are: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    if bytes.len() > state.config.upload_max_bytes {
        return Err(AppError::bad_request(format!(
            "file size cannot exceed {} bytes",
            state.config.upload_max_bytes
        )));
    }

    let doc_id = Uuid::new_v4();
    let storage_key = format!("documents/{doc_id}.{extension}");
    let file_size = bytes.len() as i64;

    let content_type = content_type.or_else(|| {
        mime_guess::from_path(&original_name)
            .first()
            .map(|mime| mime.to_string())
    });

    state
        .storage
        .put_object(&storage_key, bytes, content_type)
        .await
        .map_err(|err| {
            error!(error = %err, key = %storage_key, "failed to store document payload");
            AppError::internal(format!("failed to store document: {err}"))
        })?;

    let new_document = NewDocument {
        id: doc_id,
        title: title.unwrap_or_else(|| derive_document_title(&original_name)),
        description,
        storage_key,
        original_name: original_name.clone(),
        file_size,
        file_type: extension,
        uploaded_by: user.user_id,
        status: DOC_STATUS_PENDING.to_string(),
    };

    let mut conn = state.db()?;
    diesel::insert_into(documents::table)
        .values(&new_document)
        .execute(&mut conn)?;

    let doc: Document = documents::table.find(doc_id).first(&mut conn)?;

    info!(
        document_id = %doc.id,
        original_name = %original_name,
        size = file_size,
        "document upload succeeded"
    );

    Ok(to_detail_response(doc, user.email.clone()))
}

/// Load a document the caller is allowed to see. Editors are scoped to
/// their own uploads; a document outside the scope reads as missing.
pub(crate) fn fetch_scoped_document(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    document_id: Uuid,
) -> AppResult<Document> {
    let doc: Document = documents::table.find(document_id).first(conn)?;
    if !user.role.sees_all_documents() && doc.uploaded_by != user.user_id {
        return Err(AppError::not_found());
    }
    Ok(doc)
}

fn to_list_item(doc: Document, owner: String) -> DocumentListItem {
    DocumentListItem {
        id: doc.id,
        title: doc.title,
        description: doc.description,
        owner,
        size: doc.file_size,
        file_type: doc.file_type,
        status: doc.status,
        created_at: super::users::to_iso(doc.created_at),
        updated_at: super::users::to_iso(doc.updated_at),
        last_accessed: doc.last_accessed.map(super::users::to_iso),
    }
}

fn to_detail_response(doc: Document, owner: String) -> DocumentResponse {
    DocumentResponse {
        id: doc.id,
        title: doc.title,
        description: doc.description,
        original_name: doc.original_name,
        owner,
        uploaded_by: doc.uploaded_by,
        size: doc.file_size,
        file_type: doc.file_type,
        status: doc.status,
        content: doc.content,
        created_at: super::users::to_iso(doc.created_at),
        updated_at: super::users::to_iso(doc.updated_at),
        last_accessed: doc.last_accessed.map(super::users::to_iso),
    }
}

fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn derive_document_title(original: &str) -> String {
    let trimmed = original.trim();
    if trimmed.is_empty() {
        return "Document".to_string();
    }

    FsPath::new(trimmed)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}
