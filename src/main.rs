//! ollama-chat-bridge server binary.
//!
//! Loads configuration, sizes the blocking worker pool, and serves the chat
//! endpoints until Ctrl+C.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ollama_chat_bridge::chat::ollama::OllamaChatModel;
use ollama_chat_bridge::config::{Cli, Config};
use ollama_chat_bridge::server::chat_api::{build_router, AppState};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    init_logging(&cli);

    info!("ollama-chat-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_overrides(&cli);
    let config = Arc::new(config);

    info!(
        base_url = config.ollama.base_url,
        model = config.ollama.model,
        workers = config.worker.max_blocking_threads,
        "Configuration loaded"
    );

    // The blocking pool runs model calls; size it to the permit count.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.worker.max_blocking_threads.max(1))
        .build()?;

    runtime.block_on(serve(config))
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "ollama_chat_bridge=debug,tower_http=debug"
    } else {
        "ollama_chat_bridge=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let stuff_context = config.stuff.load_context()?;
    let model = Arc::new(OllamaChatModel::new(&config.ollama));

    // Build application state.
    let state = Arc::new(AppState::new(model, config.clone(), stuff_context));

    // Build the HTTP router.
    let app = build_router(state.clone());

    // Start the server.
    let listen_addr = &config.server.listen;
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.bridge.close();
    info!("Server stopped");
    Ok(())
}

/// Resolves when Ctrl+C is pressed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
