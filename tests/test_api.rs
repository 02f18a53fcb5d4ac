//! HTTP API tests driving the axum router with `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use docquery::config::PipelineConfig;
use docquery::llm::providers::scripted::{ScriptedProvider, ScriptedReply};
use docquery::llm::{Backend, LlmProvider};
use docquery::pipeline::confidence::ScriptedConfidence;
use docquery::pipeline::{QuerySuggester, RetryController};
use docquery::server::{self, AppState};
use docquery::store::MemoryStore;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> Router {
    let controller = RetryController::with_confidence_source(
        Backend::Offline,
        &PipelineConfig::test_default(),
        Box::new(ScriptedConfidence::new([0.9])),
    );
    app_with(Backend::Offline, controller)
}

fn app_with(backend: Backend, controller: RetryController) -> Router {
    let suggester = QuerySuggester::new(backend, Duration::from_secs(5));
    server::router(AppState::new(
        "docquery-test",
        "offline",
        Arc::new(MemoryStore::new()),
        Arc::new(controller),
        Arc::new(suggester),
    ))
}

async fn add_doc(app: &Router, sid: &str) {
    let (status, _) = call(
        app,
        Method::POST,
        &format!("/api/sessions/{sid}/documents"),
        Some(json!({ "filename": "lease.pdf", "content": "Rent is due monthly." })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn call_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn new_session(app: &Router) -> String {
    let (status, body) = call_json(app, Method::POST, "/api/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    body["session_id"].as_str().unwrap().to_string()
}

fn sse_messages(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

#[tokio::test]
async fn health_reports_mode() {
    let (status, body) = call_json(&app(), Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["mode"], "offline");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn document_lifecycle() {
    let app = app();
    let sid = new_session(&app).await;
    let docs_uri = format!("/api/sessions/{sid}/documents");

    let (status, doc) = call_json(
        &app,
        Method::POST,
        &docs_uri,
        Some(json!({ "filename": "lease.pdf", "content": "Rent is due monthly." })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(doc["filename"], "lease.pdf");
    let doc_id = doc["id"].as_str().unwrap().to_string();

    let (_, listed) = call_json(&app, Method::GET, &docs_uri, None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, _) = call_json(&app, Method::DELETE, &format!("{docs_uri}/{doc_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call_json(&app, Method::DELETE, &format!("{docs_uri}/{doc_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_document_is_rejected() {
    let app = app();
    let sid = new_session(&app).await;
    let (status, body) = call_json(
        &app,
        Method::POST,
        &format!("/api/sessions/{sid}/documents"),
        Some(json!({ "filename": "scan.pdf", "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn unknown_session_is_404() {
    let (status, body) = call_json(&app(), Method::GET, "/api/sessions/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn stream_requires_text_and_session() {
    let app = app();
    let (status, body) =
        call_json(&app, Method::POST, "/api/query/stream", Some(json!({ "session_id": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No query text provided");

    let (status, _) =
        call_json(&app, Method::POST, "/api/query/stream", Some(json!({ "text": "hello" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_answers_and_records_the_query() {
    let app = app();
    let sid = new_session(&app).await;
    call(
        &app,
        Method::POST,
        &format!("/api/sessions/{sid}/documents"),
        Some(json!({ "filename": "lease.pdf", "content": "Rent is due monthly." })),
    )
    .await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/query/stream",
        Some(json!({ "query_text": "Any deadlines?", "session_id": sid })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let messages = sse_messages(&body);
    assert_eq!(messages.first().unwrap()["status"], "analyzing_documents");
    let last = messages.last().unwrap();
    assert_eq!(last["status"], "completed");
    assert_eq!(last["attempts"], 1);
    assert_eq!(last["confidence"], 0.9);
    assert_eq!(messages.iter().filter(|m| m["done"] == true).count(), 1);

    let (_, queries) = call_json(&app, Method::GET, &format!("/api/sessions/{sid}/queries"), None).await;
    let queries = queries.as_array().unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["text"], "Any deadlines?");
    assert_eq!(queries[0]["status"], "completed");
    assert_eq!(queries[0]["attempts"], 1);
}

#[tokio::test]
async fn stream_without_documents_is_200_with_failed_event() {
    let app = app();
    let sid = new_session(&app).await;
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/query/stream",
        Some(json!({ "text": "anything?", "session_id": sid })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let messages = sse_messages(&body);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["status"], "failed");
    assert_eq!(messages[0]["done"], true);
}

#[tokio::test]
async fn clear_drops_documents_and_queries() {
    let app = app();
    let sid = new_session(&app).await;
    call(
        &app,
        Method::POST,
        &format!("/api/sessions/{sid}/documents"),
        Some(json!({ "filename": "a.txt", "content": "alpha" })),
    )
    .await;

    let (status, _) = call_json(&app, Method::POST, &format!("/api/sessions/{sid}/clear"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, detail) = call_json(&app, Method::GET, &format!("/api/sessions/{sid}"), None).await;
    assert_eq!(detail["session_id"], sid.as_str());
    assert!(detail["files"].as_array().unwrap().is_empty());
    assert!(detail["queries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn running_query_is_stored_as_processing() {
    let backend = Backend::Live(LlmProvider::Scripted(ScriptedProvider::new(vec![ScriptedReply::Stall])));
    let controller = RetryController::from_config(backend.clone(), &PipelineConfig::test_default());
    let app = app_with(backend, controller);
    let sid = new_session(&app).await;
    add_doc(&app, &sid).await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/query/stream")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": "Any deadlines?", "session_id": sid }).to_string()))
        .unwrap();
    // Hold the response so the stream stays open while generation stalls.
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let uri = format!("/api/sessions/{sid}/queries");
    let mut status = Value::Null;
    for _ in 0..100 {
        let (_, queries) = call_json(&app, Method::GET, &uri, None).await;
        status = queries[0]["status"].clone();
        if status == "processing" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, "processing");
    drop(resp);
}

#[tokio::test]
async fn query_once_returns_the_outcome_as_json() {
    let app = app();
    let sid = new_session(&app).await;
    add_doc(&app, &sid).await;

    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/query",
        Some(json!({ "text": "Summarize the lease", "session_id": sid })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["attempts"], 1);
    assert!(body["results"].as_str().unwrap().contains("lease.pdf"));

    let (_, queries) = call_json(&app, Method::GET, &format!("/api/sessions/{sid}/queries"), None).await;
    assert_eq!(queries[0]["id"], body["query_id"]);
    assert_eq!(queries[0]["status"], "completed");
}

#[tokio::test]
async fn query_once_without_documents_is_400() {
    let app = app();
    let sid = new_session(&app).await;
    let (status, body) =
        call_json(&app, Method::POST, "/api/query", Some(json!({ "text": "q", "session_id": sid }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No documents uploaded");

    let (_, queries) = call_json(&app, Method::GET, &format!("/api/sessions/{sid}/queries"), None).await;
    assert!(queries.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn extract_queries_offline() {
    let app = app();
    let (status, body) =
        call_json(&app, Method::POST, "/api/extract-queries", Some(json!({ "text": "my lease dispute" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let queries = body["queries"].as_array().unwrap();
    assert!((2..=4).contains(&queries.len()));
    assert_eq!(queries[0]["id"], "1");
    assert_eq!(queries[0]["questionNumber"], 1);
    assert_eq!(queries[0]["category"], "Facts");

    let (status, body) = call_json(&app, Method::POST, "/api/extract-queries", Some(json!({ "text": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No input text provided");
}

#[tokio::test]
async fn swap_query_offline() {
    let app = app();
    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/swap-query",
        Some(json!({ "original_query": "Who pays rent?", "user_context": "lease", "existing_queries": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let query = body["query"].as_str().unwrap();
    assert!(!query.is_empty());
    assert_ne!(query, "Who pays rent?");

    let (status, body) =
        call_json(&app, Method::POST, "/api/swap-query", Some(json!({ "user_context": "lease" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No original query provided");
}
