//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use tower::ServiceExt;

use ollama_chat_bridge::chat::error::ChatError;
use ollama_chat_bridge::chat::model::{ChatModel, Fragments};
use ollama_chat_bridge::chat::request::GenerationRequest;
use ollama_chat_bridge::config::Config;
use ollama_chat_bridge::server::chat_api::{build_router, AppState};

/// How a [`ScriptedModel`] answers.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Reply with `reply to: <prompt>`, streamed as several fragments.
    Echo,
    /// Fail before producing anything.
    Fail,
    /// Stream one fragment, then fail.
    FailMidStream,
    /// Stream one fragment, then panic inside the fragment iterator.
    PanicMidStream,
}

/// In-process chat model that records every request it receives.
pub struct ScriptedModel {
    script: Script,
    seen: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> GenerationRequest {
        self.requests().pop().expect("model was never called")
    }

    fn record(&self, request: &GenerationRequest) {
        self.seen.lock().unwrap().push(request.clone());
    }
}

impl ChatModel for ScriptedModel {
    fn default_model(&self) -> &str {
        "scripted"
    }

    fn call(&self, request: &GenerationRequest) -> Result<String, ChatError> {
        self.record(request);
        match self.script {
            Script::Echo | Script::FailMidStream | Script::PanicMidStream => Ok(format!("reply to: {}", request.prompt)),
            Script::Fail => Err(ChatError::Upstream {
                status: 500,
                message: "model crashed".to_string(),
            }),
        }
    }

    fn stream(&self, request: &GenerationRequest) -> Result<Fragments, ChatError> {
        self.record(request);
        let fragments: Vec<Result<String, ChatError>> = match self.script {
            Script::Echo => vec![
                Ok("reply".to_string()),
                Ok(" to".to_string()),
                Ok(": ".to_string()),
                Ok(request.prompt.clone()),
            ],
            Script::Fail => {
                return Err(ChatError::Upstream {
                    status: 500,
                    message: "model crashed".to_string(),
                })
            }
            Script::FailMidStream => vec![
                Ok("partial".to_string()),
                Err(ChatError::Model("lost connection".to_string())),
            ],
            Script::PanicMidStream => {
                let tail = std::iter::from_fn(|| -> Option<Result<String, ChatError>> {
                    panic!("fragment decoder crashed")
                });
                return Ok(Box::new(std::iter::once(Ok("partial".to_string())).chain(tail)));
            }
        };
        Ok(Box::new(fragments.into_iter()))
    }
}

pub fn app_with(script: Script, config: Config, stuff_context: &str) -> (Router, Arc<ScriptedModel>) {
    let model = Arc::new(ScriptedModel::new(script));
    let state = Arc::new(AppState::new(
        model.clone(),
        Arc::new(config),
        stuff_context.to_string(),
    ));
    (build_router(state), model)
}

pub fn app(script: Script) -> (Router, Arc<ScriptedModel>) {
    app_with(script, Config::default(), "")
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Concatenate the `data:` lines of an SSE body in order.
pub fn sse_data(body: &str) -> String {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect()
}

pub async fn get_ok_text(app: Router, uri: &str) -> String {
    let response = get(app, uri).await;
    assert_eq!(response.status(), StatusCode::OK, "GET {uri}");
    body_text(response).await
}
