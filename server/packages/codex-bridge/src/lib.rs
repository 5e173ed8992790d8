//! OpenAI-compatible chat completions bridge in front of the Codex CLI.

use std::sync::Arc;

use codex_bridge_backend::{Agent, LaunchSpec};

pub mod attachments;
pub mod chat;
pub mod cli;
pub mod config;
pub mod messages;
pub mod models;
pub mod output_schema;
pub mod prompt;
pub mod response;
pub mod router;
pub mod session_store;
pub mod thread_registry;

pub use config::BridgeConfig;
pub use router::{build_router, build_router_with_state, AppState};
use session_store::SessionStore;

pub async fn run_server(
    config: BridgeConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = match &config.state_file {
        Some(path) => SessionStore::load(path).await,
        None => SessionStore::in_memory(),
    };
    let agent = Agent::exec(LaunchSpec::codex(config.codex_path.clone()));
    run_server_with_state(Arc::new(AppState::new(config, agent, store))).await
}

pub async fn run_server_with_state(
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let host = state.config.host.clone();
    let port = state.config.port;
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        model = %state.config.models.model,
        reasoning = %state.config.models.reasoning,
        auth = state.config.api_key.is_some(),
        state_file = ?state.config.state_file,
        "codex-bridge listening"
    );
    if state.config.api_key.is_none() {
        tracing::warn!("no API key configured, requests are not authenticated");
    }

    let app = build_router_with_state(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}
