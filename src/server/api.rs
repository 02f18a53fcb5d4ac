//! Axum handlers for `/api/*` routes.
//!
//! Every handler receives [`AppState`] via [`axum::extract::State`] and
//! returns an axum [`Response`]. Errors are JSON bodies of the form
//! `{"error": code, "message": text}`.

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::pipeline::{DocumentContext, EventSink, RetryController};
use crate::store::{Query, QueryStatus, SessionStore, StoredDocument};

use super::AppState;

/// Events buffered between the controller task and the response body.
const EVENT_BUFFER: usize = 64;

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct AddDocumentRequest {
    filename: String,
    content: String,
}

#[derive(Deserialize)]
pub(super) struct QueryRequest {
    /// Either `text` or `query_text` carries the question.
    text: Option<String>,
    query_text: Option<String>,
    session_id: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct ExtractRequest {
    text: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct SwapRequest {
    original_query: Option<String>,
    #[serde(default)]
    user_context: String,
    #[serde(default)]
    existing_queries: Vec<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn bad_request(msg: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, json_error("bad_request", msg)).into_response()
}

fn store_failure(e: AppError) -> Response {
    match e {
        AppError::NotFound(what) => {
            (StatusCode::NOT_FOUND, json_error("not_found", format!("{what} not found")))
                .into_response()
        }
        other => {
            warn!("store operation failed: {other}");
            (StatusCode::INTERNAL_SERVER_ERROR, json_error("internal", other)).into_response()
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/health
pub(super) async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "healthy",
        "service": &*state.service_name,
        "mode": state.mode,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// POST /api/sessions
pub(super) async fn create_session(State(state): State<AppState>) -> Response {
    match state.store.create_session() {
        Ok(id) => {
            debug!(session_id = %id, "session created");
            (StatusCode::CREATED, Json(json!({ "session_id": id }))).into_response()
        }
        Err(e) => store_failure(e),
    }
}

/// GET /api/sessions/{session_id}
pub(super) async fn session_detail(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let detail = state.store.documents(&session_id).and_then(|docs| {
        let queries = state.store.queries(&session_id)?;
        Ok((docs, queries))
    });
    match detail {
        Ok((docs, queries)) => Json(json!({
            "session_id": session_id,
            "files": docs.iter().map(StoredDocument::summary).collect::<Vec<_>>(),
            "queries": queries,
        }))
        .into_response(),
        Err(e) => store_failure(e),
    }
}

/// POST /api/sessions/{session_id}/documents
pub(super) async fn add_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Result<Json<AddDocumentRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    if req.filename.trim().is_empty() {
        return bad_request("filename must not be empty");
    }
    if req.content.trim().is_empty() {
        return bad_request("document has no extracted text");
    }

    match state.store.add_document(&session_id, &req.filename, &req.content) {
        Ok(doc) => {
            info!(%session_id, doc_id = %doc.id, filename = %doc.filename, "document added");
            (StatusCode::CREATED, Json(doc.summary())).into_response()
        }
        Err(e) => store_failure(e),
    }
}

/// GET /api/sessions/{session_id}/documents
pub(super) async fn list_documents(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.documents(&session_id) {
        Ok(docs) => {
            Json(docs.iter().map(StoredDocument::summary).collect::<Vec<_>>()).into_response()
        }
        Err(e) => store_failure(e),
    }
}

/// DELETE /api/sessions/{session_id}/documents/{doc_id}
pub(super) async fn delete_document(
    State(state): State<AppState>,
    Path((session_id, doc_id)): Path<(String, String)>,
) -> Response {
    match state.store.remove_document(&session_id, &doc_id) {
        Ok(()) => Json(json!({ "deleted": doc_id })).into_response(),
        Err(e) => store_failure(e),
    }
}

/// GET /api/sessions/{session_id}/queries
pub(super) async fn list_queries(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.queries(&session_id) {
        Ok(queries) => Json(queries).into_response(),
        Err(e) => store_failure(e),
    }
}

/// POST /api/sessions/{session_id}/clear
pub(super) async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.store.clear(&session_id) {
        Ok(()) => Json(json!({ "session_id": session_id, "cleared": true })).into_response(),
        Err(e) => store_failure(e),
    }
}

/// Validated query input: the question and the session it runs against.
fn query_input(body: Result<Json<QueryRequest>, JsonRejection>) -> Result<(String, String), Response> {
    let Json(req) = body.map_err(|rejection| bad_request(rejection.body_text()))?;
    let Some(text) = non_blank(req.text).or_else(|| non_blank(req.query_text)) else {
        return Err(bad_request("No query text provided"));
    };
    let Some(session_id) = non_blank(req.session_id) else {
        return Err(bad_request("No session_id provided"));
    };
    Ok((text, session_id))
}

/// Drive `query` through the controller, persisting `processing` before the
/// first stage and the terminal state after the last.
async fn run_recorded(
    controller: &RetryController,
    store: &dyn SessionStore,
    session_id: &str,
    mut query: Query,
    documents: Vec<DocumentContext>,
    sink: &EventSink,
) -> Query {
    query.status = QueryStatus::Processing;
    if let Err(e) = store.update_query(session_id, &query) {
        warn!(%session_id, query_id = %query.id, "could not mark query processing: {e}");
    }
    controller.run(&mut query, documents, sink).await;
    if let Err(e) = store.update_query(session_id, &query) {
        warn!(%session_id, query_id = %query.id, "could not record query outcome: {e}");
    }
    query
}

/// POST /api/query/stream — answer a query as a server-sent event stream.
///
/// Validation failures are plain 4xx JSON responses. Once streaming starts
/// the status is 200 and the outcome is carried by the terminal event.
pub(super) async fn query_stream(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let (text, session_id) = match query_input(body) {
        Ok(input) => input,
        Err(resp) => return resp,
    };

    let documents = match state.store.session_documents(&session_id) {
        Ok(docs) => docs,
        Err(e) => return store_failure(e),
    };
    let query = Query::new(text);
    if let Err(e) = state.store.record_query(&session_id, &query) {
        return store_failure(e);
    }
    info!(%session_id, query_id = %query.id, documents = documents.len(), "query accepted");

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let controller = state.controller.clone();
    let store = state.store.clone();
    tokio::spawn(async move {
        run_recorded(&controller, &*store, &session_id, query, documents, &sink).await;
        // The response body ends when the sink drops, after the store update.
        drop(sink);
    });

    let events = ReceiverStream::new(rx)
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.encode_line())));

    let mut response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

/// POST /api/query — run the pipeline to completion and return the outcome.
///
/// The run is detached from the connection; a client that hangs up does not
/// abandon the query.
pub(super) async fn query_once(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let (text, session_id) = match query_input(body) {
        Ok(input) => input,
        Err(resp) => return resp,
    };

    let documents = match state.store.session_documents(&session_id) {
        Ok(docs) if docs.is_empty() => return bad_request("No documents uploaded"),
        Ok(docs) => docs,
        Err(e) => return store_failure(e),
    };
    let query = Query::new(text);
    if let Err(e) = state.store.record_query(&session_id, &query) {
        return store_failure(e);
    }
    info!(%session_id, query_id = %query.id, documents = documents.len(), "query accepted");

    let controller = state.controller.clone();
    let store = state.store.clone();
    let run = tokio::spawn(async move {
        let (sink, mut rx) = EventSink::channel(EVENT_BUFFER);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        run_recorded(&controller, &*store, &session_id, query, documents, &sink).await
    });

    match run.await {
        Ok(query) => Json(json!({
            "success": true,
            "query_id": query.id,
            "status": query.status,
            "results": query.result,
            "confidence": query.confidence,
            "attempts": query.attempts,
        }))
        .into_response(),
        Err(e) => {
            warn!("query task failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, json_error("internal", e)).into_response()
        }
    }
}

/// POST /api/extract-queries
pub(super) async fn extract_queries(
    State(state): State<AppState>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(input) = non_blank(req.text) else {
        return bad_request("No input text provided");
    };

    let queries = state.suggester.extract(&input).await;
    debug!(count = queries.len(), "extract-queries answered");
    Json(json!({ "success": true, "queries": queries })).into_response()
}

/// POST /api/swap-query
pub(super) async fn swap_query(
    State(state): State<AppState>,
    body: Result<Json<SwapRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(original) = req.original_query.filter(|q| !q.is_empty()) else {
        return bad_request("No original query provided");
    };

    let query = state.suggester.swap(&original, &req.user_context, &req.existing_queries).await;
    Json(json!({ "success": true, "query": query })).into_response()
}
