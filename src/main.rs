//! docquery — HTTP entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger once
//!   4. Resolve the LLM backend (live or offline)
//!   5. Build the retry controller, question helpers and session store
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Serve HTTP until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use docquery::{
    config, error, llm, logger,
    pipeline::{QuerySuggester, RetryController},
    server,
    store::MemoryStore,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), error::AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;

    logger::init(&config.log_level, config.log_file.as_deref())?;

    info!(
        service = %config.service_name,
        bind = %config.server.bind,
        log_level = %config.log_level,
        provider = %config.llm.provider,
        "config loaded"
    );

    let backend = llm::providers::build(&config.llm, config.llm_api_key.clone())?;
    let mode = backend.mode_name();

    let suggester = Arc::new(QuerySuggester::new(backend.clone(), config.pipeline.call_timeout));
    let controller = Arc::new(RetryController::from_config(backend, &config.pipeline));
    let state = server::AppState::new(
        &config.service_name,
        mode,
        Arc::new(MemoryStore::new()),
        controller,
        suggester,
    );

    // Ctrl-C cancels the shutdown token; the server watches it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    server::serve(&config.server.bind, state, shutdown).await
}
