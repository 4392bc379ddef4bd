//! Chat HTTP API.
//!
//! - GET /ask
//! - GET /{client,model}/simple/chat
//! - GET /{client,model}/stream/chat
//! - GET /{client,model}/chat
//! - GET /{client,model}/sse/chat
//! - GET /{client,model}/with/system/prompt
//! - GET /{client,model}/custom/options
//! - GET /prompt/ai/stuff
//! - GET /health

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::chat::adapter::{self, Endpoint, Namespace, RequestAdapter};
use crate::chat::bridge::BlockingBridge;
use crate::chat::model::ChatModel;
use crate::chat::request::GenerationRequest;
use crate::config::Config;
use crate::server::error::AppResult;
use crate::server::streaming::{sse_response, ExchangeLog};

/// Application state shared across handlers.
pub struct AppState {
    pub bridge: BlockingBridge,
    pub config: Arc<Config>,
    pub client: RequestAdapter,
    pub model: RequestAdapter,
    /// Document used by `/prompt/ai/stuff?stuffit=true`.
    pub stuff_context: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(model: Arc<dyn ChatModel>, config: Arc<Config>, stuff_context: String) -> Self {
        Self {
            bridge: BlockingBridge::new(model, &config.worker),
            client: RequestAdapter::new(Namespace::Client, config.chat.clone()),
            model: RequestAdapter::new(Namespace::Model, config.chat.clone()),
            config,
            stuff_context,
            start_time: Instant::now(),
        }
    }

    fn adapter(&self, namespace: Namespace) -> &RequestAdapter {
        match namespace {
            Namespace::Client => &self.client,
            Namespace::Model => &self.model,
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ask", get(ask))
        .route("/prompt/ai/stuff", get(stuff))
        .route("/health", get(health))
        .nest("/client", namespace_routes(Namespace::Client))
        .nest("/model", namespace_routes(Namespace::Model))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn namespace_routes(namespace: Namespace) -> Router<Arc<AppState>> {
    Router::new()
        .route("/simple/chat", get(simple_chat))
        .route("/stream/chat", get(stream_chat))
        .route("/chat", get(chat))
        .route("/sse/chat", get(sse_chat))
        .route("/with/system/prompt", get(with_system_prompt))
        .route("/custom/options", get(custom_options))
        .layer(Extension(namespace))
}

// ─── Query Types ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PromptQuery {
    #[serde(rename = "userPrompt")]
    pub user_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AskQuery {
    pub question: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StuffQuery {
    pub message: Option<String>,
    /// Kept as text so unparsable values fall back to `false`.
    pub stuffit: Option<String>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub model: String,
    pub available_workers: usize,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn complete(
    state: &AppState,
    log_exchange: bool,
    request: GenerationRequest,
) -> AppResult<String> {
    if log_exchange {
        debug!(
            request_id = request.request_id,
            prompt = request.prompt,
            system = ?request.system_prompt,
            options = ?request.options,
            "Chat request"
        );
    }

    let request_id = request.request_id.clone();
    let text = state.bridge.call(request).await?;

    if log_exchange {
        debug!(request_id, response = text, "Chat response");
    }
    Ok(text)
}

async fn stream(
    state: &AppState,
    log_exchange: bool,
    request: GenerationRequest,
) -> AppResult<Response> {
    let exchange = log_exchange.then(|| {
        debug!(
            request_id = request.request_id,
            prompt = request.prompt,
            system = ?request.system_prompt,
            options = ?request.options,
            "Chat stream request"
        );
        ExchangeLog::new(request.request_id.clone())
    });

    let rx = state.bridge.stream(request).await?;
    Ok(sse_response(rx, exchange))
}

async fn adapt_and_complete(
    state: &AppState,
    namespace: Namespace,
    endpoint: Endpoint,
    user_prompt: Option<String>,
) -> AppResult<String> {
    let request = state.adapter(namespace).adapt(endpoint, user_prompt);
    info!(
        %namespace,
        ?endpoint,
        request_id = request.request_id,
        "Chat completion request"
    );
    complete(state, namespace.logs_exchanges(), request).await
}

async fn adapt_and_stream(
    state: &AppState,
    namespace: Namespace,
    endpoint: Endpoint,
    user_prompt: Option<String>,
) -> AppResult<Response> {
    let request = state.adapter(namespace).adapt(endpoint, user_prompt);
    info!(
        %namespace,
        ?endpoint,
        request_id = request.request_id,
        "Chat stream request"
    );
    stream(state, namespace.logs_exchanges(), request).await
}

async fn ask(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AskQuery>,
) -> AppResult<String> {
    let request = adapter::ask(query.question);
    info!(request_id = request.request_id, question = request.prompt, "Ask request");
    complete(&state, false, request).await
}

async fn simple_chat(
    State(state): State<Arc<AppState>>,
    Extension(namespace): Extension<Namespace>,
) -> AppResult<String> {
    adapt_and_complete(&state, namespace, Endpoint::SimpleChat, None).await
}

async fn stream_chat(
    State(state): State<Arc<AppState>>,
    Extension(namespace): Extension<Namespace>,
) -> AppResult<Response> {
    adapt_and_stream(&state, namespace, Endpoint::StreamChat, None).await
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(namespace): Extension<Namespace>,
    Query(query): Query<PromptQuery>,
) -> AppResult<String> {
    adapt_and_complete(&state, namespace, Endpoint::Chat, query.user_prompt).await
}

async fn sse_chat(
    State(state): State<Arc<AppState>>,
    Extension(namespace): Extension<Namespace>,
    Query(query): Query<PromptQuery>,
) -> AppResult<Response> {
    adapt_and_stream(&state, namespace, Endpoint::SseChat, query.user_prompt).await
}

async fn with_system_prompt(
    State(state): State<Arc<AppState>>,
    Extension(namespace): Extension<Namespace>,
    Query(query): Query<PromptQuery>,
) -> AppResult<String> {
    adapt_and_complete(&state, namespace, Endpoint::WithSystemPrompt, query.user_prompt).await
}

async fn custom_options(
    State(state): State<Arc<AppState>>,
    Extension(namespace): Extension<Namespace>,
    Query(query): Query<PromptQuery>,
) -> AppResult<String> {
    adapt_and_complete(&state, namespace, Endpoint::CustomOptions, query.user_prompt).await
}

async fn stuff(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StuffQuery>,
) -> AppResult<Response> {
    let stuffit = adapter::parse_flag(query.stuffit.as_deref());
    let request = adapter::stuff(
        query.message,
        stuffit,
        &state.config.stuff,
        &state.stuff_context,
    );
    info!(request_id = request.request_id, stuffit, "Stuffed prompt request");
    stream(&state, true, request).await
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        model: state.bridge.model().default_model().to_string(),
        available_workers: state.bridge.available_workers(),
    })
}
