use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use pdfium_render::prelude::*;
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::{Document, NewDocumentChunk, DOC_STATUS_COMPLETED, DOC_STATUS_FAILED},
    schema::{document_chunks, documents},
    state::AppState,
};

use super::{JobExecution, JobHandler};

/// Placeholder for a real chunker/embedder: every ingestion emits this many
/// chunks with a fixed dummy vector.
pub const CHUNK_COUNT: i32 = 5;

#[derive(Clone, Debug, Deserialize)]
struct IngestPayload {
    document_id: Uuid,
}

pub struct IngestDocumentJob;

impl IngestDocumentJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for IngestDocumentJob {
    fn job_type(&self) -> &'static str {
        crate::jobs::JOB_INGEST_DOCUMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: IngestPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid ingest payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        let document_id = payload.document_id;
        let document =
            match task::spawn_blocking(move || load_document(state_clone, document_id)).await {
                Ok(Ok(Some(document))) => document,
                Ok(Ok(None)) => {
                    // The document vanished between trigger and execution.
                    return JobExecution::Failed {
                        error: format!("document {document_id} no longer exists"),
                    };
                }
                Ok(Err(err)) => {
                    warn!(job_id = %job.id, error = %err, "ingest job will retry");
                    return JobExecution::Retry {
                        delay: Duration::from_secs(30),
                        error: err,
                    };
                }
                Err(join_err) => {
                    error!(job_id = %job.id, error = %join_err, "ingest load task panicked");
                    return JobExecution::Retry {
                        delay: Duration::from_secs(60),
                        error: format!("worker panicked: {join_err}"),
                    };
                }
            };

        let bytes = match state.storage.get_object(&document.storage_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to fetch payload for ingestion");
                return JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err.to_string(),
                };
            }
        };

        let file_type = document.file_type.clone();
        let content =
            match task::spawn_blocking(move || extract_content(&file_type, &bytes)).await {
                Ok(content) => content,
                Err(join_err) => {
                    error!(job_id = %job.id, error = %join_err, "extraction task panicked");
                    return JobExecution::Retry {
                        delay: Duration::from_secs(60),
                        error: format!("worker panicked: {join_err}"),
                    };
                }
            };

        let state_clone = state.clone();
        match task::spawn_blocking(move || finalize_ingestion(state_clone, &document, content))
            .await
        {
            Ok(Ok(())) => {
                info!(document_id = %document_id, "document ingestion completed");
                JobExecution::Success
            }
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "failed to persist ingestion result");
                JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: err,
                }
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "finalize task panicked");
                JobExecution::Retry {
                    delay: Duration::from_secs(30),
                    error: format!("finalize panic: {join_err}"),
                }
            }
        }
    }

    async fn on_exhausted(&self, state: Arc<AppState>, job: &crate::models::Job) {
        let payload: IngestPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(_) => return,
        };

        let document_id = payload.document_id;
        let result =
            task::spawn_blocking(move || mark_document_failed(state, document_id)).await;
        match result {
            Ok(Ok(())) => {
                warn!(document_id = %document_id, "document marked failed after retry exhaustion");
            }
            Ok(Err(err)) => {
                error!(document_id = %document_id, error = %err, "failed to mark document failed");
            }
            Err(join_err) => {
                error!(document_id = %document_id, error = %join_err, "mark-failed task panicked");
            }
        }
    }
}

fn load_document(state: Arc<AppState>, document_id: Uuid) -> Result<Option<Document>, String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;

    documents::table
        .find(document_id)
        .first(&mut conn)
        .optional()
        .map_err(|err| format!("{err:?}"))
}

/// Text extraction dispatched by declared file type. Extraction failures are
/// folded into the returned content rather than propagated; the caller
/// always completes the document.
pub fn extract_content(file_type: &str, bytes: &[u8]) -> String {
    match file_type {
        "txt" | "md" | "csv" => String::from_utf8_lossy(bytes).into_owned(),
        "pdf" => match extract_pdf_text(bytes) {
            Ok(text) => text,
            Err(err) => format!("Error extracting content: {err}"),
        },
        "doc" | "docx" => match extract_docx_text(bytes) {
            Ok(text) => text,
            Err(err) => format!("Error extracting content: {err}"),
        },
        other => format!("File type {other} is not supported for content extraction."),
    }
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, String> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|err| format!("load pdf: {err}"))?;

    let mut combined = String::new();
    let pages = document.pages();
    for page_index in 0..pages.len() {
        let page = pages
            .get(page_index)
            .map_err(|err| format!("load page {page_index}: {err}"))?;
        if let Ok(page_text) = page.text() {
            for segment in page_text.segments().iter() {
                combined.push_str(&segment.text());
                combined.push('\n');
            }
        }
        combined.push('\n');
    }

    Ok(combined)
}

fn extract_docx_text(bytes: &[u8]) -> Result<String, String> {
    let docx = docx_rs::read_docx(bytes).map_err(|err| format!("load docx: {err}"))?;

    let mut combined = String::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(text) = child {
                            combined.push_str(&text.text);
                        }
                    }
                }
            }
            combined.push('\n');
        }
    }

    Ok(combined)
}

pub(crate) fn build_chunks(document_id: Uuid, title: &str) -> Vec<NewDocumentChunk> {
    (0..CHUNK_COUNT)
        .map(|index| NewDocumentChunk {
            id: Uuid::new_v4(),
            document_id,
            chunk_index: index,
            chunk_text: format!("Sample chunk {index} from {title}"),
            embedding: json!({ "values": [0.1, 0.2, 0.3] }),
        })
        .collect()
}

/// Content, chunks, and the `completed` status land in one transaction, so
/// chunks are never observable on a document that is not completed. Prior
/// chunks are cleared first; re-ingestion after a failure cannot
/// double-write.
fn finalize_ingestion(
    state: Arc<AppState>,
    document: &Document,
    content: String,
) -> Result<(), String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;
    let chunks = build_chunks(document.id, &document.title);

    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        diesel::delete(
            document_chunks::table.filter(document_chunks::document_id.eq(document.id)),
        )
        .execute(conn)?;

        diesel::insert_into(document_chunks::table)
            .values(&chunks)
            .execute(conn)?;

        diesel::update(documents::table.find(document.id))
            .set((
                documents::content.eq(Some(content)),
                documents::status.eq(DOC_STATUS_COMPLETED),
                documents::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        Ok(())
    })
    .map_err(|err| format!("{err:?}"))
}

fn mark_document_failed(state: Arc<AppState>, document_id: Uuid) -> Result<(), String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;

    diesel::update(documents::table.find(document_id))
        .set((
            documents::status.eq(DOC_STATUS_FAILED),
            documents::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .map_err(|err| format!("{err:?}"))?;

    Ok(())
}
