//! Axum HTTP surface.
//!
//! ## URL layout
//!
//! ```text
//! GET    /api/health
//! POST   /api/sessions
//! GET    /api/sessions/{session_id}
//! POST   /api/sessions/{session_id}/documents
//! GET    /api/sessions/{session_id}/documents
//! DELETE /api/sessions/{session_id}/documents/{doc_id}
//! GET    /api/sessions/{session_id}/queries
//! POST   /api/sessions/{session_id}/clear
//! POST   /api/query/stream          → text/event-stream
//! POST   /api/query
//! POST   /api/extract-queries
//! POST   /api/swap-query
//! ```

mod api;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::pipeline::{QuerySuggester, RetryController};
use crate::store::SessionStore;

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone: all fields are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub service_name: Arc<str>,
    /// `"offline"` or `"live"`.
    pub mode: &'static str,
    pub store: Arc<dyn SessionStore>,
    pub controller: Arc<RetryController>,
    pub suggester: Arc<QuerySuggester>,
}

impl AppState {
    pub fn new(
        service_name: &str,
        mode: &'static str,
        store: Arc<dyn SessionStore>,
        controller: Arc<RetryController>,
        suggester: Arc<QuerySuggester>,
    ) -> Self {
        Self { service_name: Arc::from(service_name), mode, store, controller, suggester }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health",                                   get(api::health))
        .route("/api/sessions",                                 post(api::create_session))
        .route("/api/sessions/{session_id}",                    get(api::session_detail))
        .route("/api/sessions/{session_id}/documents",          post(api::add_document).get(api::list_documents))
        .route("/api/sessions/{session_id}/documents/{doc_id}", delete(api::delete_document))
        .route("/api/sessions/{session_id}/queries",            get(api::list_queries))
        .route("/api/sessions/{session_id}/clear",              post(api::clear_session))
        .route("/api/query/stream",                             post(api::query_stream))
        .route("/api/query",                                    post(api::query_once))
        .route("/api/extract-queries",                          post(api::extract_queries))
        .route("/api/swap-query",                               post(api::swap_query))
        .with_state(state)
}

/// Bind `bind_addr` and serve until `shutdown` is cancelled.
pub async fn serve(
    bind_addr: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let service = state.service_name.clone();
    let mode = state.mode;

    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind_addr}: {e}")))?;

    info!(%service, %bind_addr, mode, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("http server error: {e}")))?;

    info!(%service, "http server shut down");
    Ok(())
}
