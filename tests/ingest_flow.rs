mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use docvault::jobs::{JOB_INGEST_DOCUMENT, JOB_MAX_ATTEMPTS};
use docvault::storage::ObjectStorage;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Deserialize)]
struct DocumentInfo {
    id: Uuid,
    status: String,
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkInfo {
    chunk_index: i32,
    chunk_text: String,
    embedding: Value,
}

async fn fetch_document(app: &TestApp, id: Uuid, token: &str) -> Result<DocumentInfo> {
    let response = app.get(&format!("/api/documents/{id}"), Some(token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn fetch_chunks(app: &TestApp, id: Uuid, token: &str) -> Result<Vec<ChunkInfo>> {
    let response = app
        .get(&format!("/api/documents/{id}/chunks"), Some(token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[tokio::test]
async fn text_document_completes_with_content_and_five_chunks() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("editor@example.com", "editor-pass", "editor").await?;
    let token = app.login_token("editor@example.com", "editor-pass").await?;

    let created = app
        .upload_document("hello.txt", "text/plain", b"hello", None, &token)
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_to_vec(created.into_body()).await?;
    let doc: DocumentInfo = serde_json::from_slice(&body)?;
    assert_eq!(doc.status, "pending");

    // The trigger flips the status before any background work runs.
    let trigger = app
        .post_json(
            &format!("/api/documents/{}/ingest", doc.id),
            &serde_json::json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(trigger.status(), StatusCode::OK);
    let body = body_to_vec(trigger.into_body()).await?;
    let ack: Value = serde_json::from_slice(&body)?;
    assert_eq!(ack["status"], "ingestion started");

    let processing = fetch_document(&app, doc.id, &token).await?;
    assert_eq!(processing.status, "processing");
    assert_eq!(app.jobs_by_type(JOB_INGEST_DOCUMENT).await?.len(), 1);

    let processed = app.drain_jobs().await?;
    assert_eq!(processed, 1);

    let completed = fetch_document(&app, doc.id, &token).await?;
    assert_eq!(completed.status, "completed");
    assert_eq!(completed.content.as_deref(), Some("hello"));

    let chunks = fetch_chunks(&app, doc.id, &token).await?;
    assert_eq!(chunks.len(), 5);
    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, index as i32);
        assert!(chunk.chunk_text.contains("Sample chunk"));
        assert_eq!(chunk.embedding["values"], serde_json::json!([0.1, 0.2, 0.3]));
    }

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn trigger_is_rejected_unless_pending_or_failed() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("editor@example.com", "editor-pass", "editor").await?;
    let token = app.login_token("editor@example.com", "editor-pass").await?;

    let created = app
        .upload_document("gated.txt", "text/plain", b"gate", None, &token)
        .await?;
    let body = body_to_vec(created.into_body()).await?;
    let doc: DocumentInfo = serde_json::from_slice(&body)?;

    let first = app
        .post_json(
            &format!("/api/documents/{}/ingest", doc.id),
            &serde_json::json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(first.status(), StatusCode::OK);

    // A second trigger while processing conflicts and changes nothing.
    let second = app
        .post_json(
            &format!("/api/documents/{}/ingest", doc.id),
            &serde_json::json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(app.jobs_by_type(JOB_INGEST_DOCUMENT).await?.len(), 1);

    app.drain_jobs().await?;
    let completed = fetch_document(&app, doc.id, &token).await?;
    assert_eq!(completed.status, "completed");

    // Completed documents reject the trigger outright.
    let third = app
        .post_json(
            &format!("/api/documents/{}/ingest", doc.id),
            &serde_json::json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(third.status(), StatusCode::CONFLICT);

    let unchanged = fetch_document(&app, doc.id, &token).await?;
    assert_eq!(unchanged.status, "completed");
    assert_eq!(app.jobs_by_type(JOB_INGEST_DOCUMENT).await?.len(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unsupported_extension_still_completes_with_placeholder() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("editor@example.com", "editor-pass", "editor").await?;
    let token = app.login_token("editor@example.com", "editor-pass").await?;

    let created = app
        .upload_document("diagram.png", "image/png", b"\x89PNG\r\n", None, &token)
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = body_to_vec(created.into_body()).await?;
    let doc: DocumentInfo = serde_json::from_slice(&body)?;

    let trigger = app
        .post_json(
            &format!("/api/documents/{}/ingest", doc.id),
            &serde_json::json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(trigger.status(), StatusCode::OK);

    app.drain_jobs().await?;

    let completed = fetch_document(&app, doc.id, &token).await?;
    assert_eq!(completed.status, "completed");
    let content = completed.content.unwrap_or_default();
    assert!(content.contains("not supported"), "content was: {content}");

    let chunks = fetch_chunks(&app, doc.id, &token).await?;
    assert_eq!(chunks.len(), 5);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_document_cascades_to_its_chunks() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("editor@example.com", "editor-pass", "editor").await?;
    let token = app.login_token("editor@example.com", "editor-pass").await?;

    let created = app
        .upload_document("doomed.txt", "text/plain", b"doomed", None, &token)
        .await?;
    let body = body_to_vec(created.into_body()).await?;
    let doc: DocumentInfo = serde_json::from_slice(&body)?;

    app.post_json(
        &format!("/api/documents/{}/ingest", doc.id),
        &serde_json::json!({}),
        Some(&token),
    )
    .await?;
    app.drain_jobs().await?;
    assert_eq!(fetch_chunks(&app, doc.id, &token).await?.len(), 5);

    let deleted = app
        .delete(&format!("/api/documents/{}", doc.id), Some(&token))
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let orphaned: i64 = app
        .with_conn(move |conn| {
            use diesel::dsl::count_star;
            use diesel::prelude::*;
            use docvault::schema::document_chunks::dsl::*;
            document_chunks
                .select(count_star())
                .first::<i64>(conn)
                .map_err(Into::into)
        })
        .await?;
    assert_eq!(orphaned, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_mark_the_document_failed_and_allow_retrigger() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("editor@example.com", "editor-pass", "editor").await?;
    let token = app.login_token("editor@example.com", "editor-pass").await?;

    let created = app
        .upload_document("flaky.txt", "text/plain", b"flaky", None, &token)
        .await?;
    let body = body_to_vec(created.into_body()).await?;
    let doc: DocumentInfo = serde_json::from_slice(&body)?;
    let storage_key = format!("documents/{}.txt", doc.id);

    app.post_json(
        &format!("/api/documents/{}/ingest", doc.id),
        &serde_json::json!({}),
        Some(&token),
    )
    .await?;

    // Make the payload unfetchable and burn the retry budget so the next
    // attempt is the last one.
    app.storage().remove(&storage_key).await;
    app.with_conn(|conn| {
        use diesel::prelude::*;
        use docvault::schema::jobs::dsl::*;
        diesel::update(jobs)
            .set(attempts.eq(JOB_MAX_ATTEMPTS))
            .execute(conn)
            .map_err(anyhow::Error::from)?;
        Ok(())
    })
    .await?;

    app.drain_jobs().await?;

    let failed = fetch_document(&app, doc.id, &token).await?;
    assert_eq!(failed.status, "failed");
    assert_eq!(fetch_chunks(&app, doc.id, &token).await?.len(), 0);

    // A failed document may be retried; a successful pass replaces rather
    // than duplicates chunk rows.
    app.storage()
        .put_object(&storage_key, b"flaky".to_vec(), Some("text/plain".into()))
        .await?;

    let retrigger = app
        .post_json(
            &format!("/api/documents/{}/ingest", doc.id),
            &serde_json::json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(retrigger.status(), StatusCode::OK);

    app.drain_jobs().await?;

    let completed = fetch_document(&app, doc.id, &token).await?;
    assert_eq!(completed.status, "completed");
    assert_eq!(completed.content.as_deref(), Some("flaky"));
    assert_eq!(fetch_chunks(&app, doc.id, &token).await?.len(), 5);

    app.cleanup().await?;
    Ok(())
}
