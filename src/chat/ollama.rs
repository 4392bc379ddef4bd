//! Ollama `/api/chat` client.
//!
//! Speaks the native Ollama chat API over a blocking `reqwest` client:
//! single responses are one JSON object, streamed responses are
//! newline-delimited JSON chunks terminated by a `"done": true` chunk.

use std::cell::RefCell;
use std::io::{BufRead, BufReader, Lines};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, trace};

use crate::chat::error::ChatError;
use crate::chat::model::{ChatModel, Fragments};
use crate::chat::request::GenerationRequest;
use crate::config::OllamaConfig;

thread_local! {
    /// Client reused by every call made on this worker thread.
    static WORKER_CLIENT: RefCell<Option<(Duration, Client)>> = const { RefCell::new(None) };
}

/// The calling thread's client, built on first use.
///
/// Blocking clients own a runtime thread and must not be dropped inside
/// async code; keeping them thread-local to the blocking pool means they are
/// only ever dropped when a worker thread exits.
fn worker_client(timeout: Duration) -> Result<Client, ChatError> {
    WORKER_CLIENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some((cached_timeout, client)) = slot.as_ref() {
            if *cached_timeout == timeout {
                return Ok(client.clone());
            }
        }

        debug!(?timeout, "Building HTTP client for worker thread");
        let client = Client::builder().timeout(timeout).build()?;
        *slot = Some((timeout, client.clone()));
        Ok(client)
    })
}

/// Ollama-backed [`ChatModel`].
#[derive(Debug, Clone)]
pub struct OllamaChatModel {
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "WireOptions::is_empty")]
    options: WireOptions,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Default, Serialize)]
struct WireOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl WireOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none() && self.num_predict.is_none()
    }
}

/// One response object (single mode) or one NDJSON line (stream mode).
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<WireReply>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    #[serde(default)]
    content: String,
}

impl OllamaChatModel {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn body<'a>(&'a self, request: &'a GenerationRequest, stream: bool) -> ChatRequestBody<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequestBody {
            model: request.options.model.as_deref().unwrap_or(self.model.as_str()),
            messages,
            stream,
            options: WireOptions {
                temperature: request.options.temperature,
                top_p: request.options.top_p,
                num_predict: request.options.max_tokens,
            },
        }
    }

    /// Send the request and check the status.
    fn send(&self, request: &GenerationRequest, stream: bool) -> Result<Response, ChatError> {
        let client = worker_client(self.timeout)?;
        let url = format!("{}/api/chat", self.base_url);
        let body = self.body(request, stream);

        debug!(
            request_id = %request.request_id,
            %url,
            model = body.model,
            stream,
            "Sending chat request"
        );

        let response = client.post(&url).json(&body).send()?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response
            .text()
            .unwrap_or_else(|_| "failed to read error body".to_string());
        let message = serde_json::from_str::<ChatChunk>(&text)
            .ok()
            .and_then(|chunk| chunk.error)
            .unwrap_or(text);

        error!(%status, %message, "Chat request failed");
        Err(ChatError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

impl ChatModel for OllamaChatModel {
    fn default_model(&self) -> &str {
        &self.model
    }

    #[instrument(name = "ollama.call", skip_all, fields(request_id = %request.request_id))]
    fn call(&self, request: &GenerationRequest) -> Result<String, ChatError> {
        let text = self.send(request, false)?.text()?;
        let chunk: ChatChunk = serde_json::from_str(&text)?;
        if let Some(message) = chunk.error {
            return Err(ChatError::Model(message));
        }

        let content = chunk.message.map(|m| m.content).unwrap_or_default();
        trace!(len = content.len(), "Chat response received");
        Ok(content)
    }

    #[instrument(name = "ollama.stream", skip_all, fields(request_id = %request.request_id))]
    fn stream(&self, request: &GenerationRequest) -> Result<Fragments, ChatError> {
        let response = self.send(request, true)?;
        Ok(Box::new(NdjsonFragments {
            lines: BufReader::new(response).lines(),
            finished: false,
        }))
    }
}

/// Iterator over the content fragments of an NDJSON chat stream.
struct NdjsonFragments {
    lines: Lines<BufReader<Response>>,
    finished: bool,
}

impl Iterator for NdjsonFragments {
    type Item = Result<String, ChatError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.finished = true;
                    return Some(Err(ChatError::Model(
                        "stream ended before the final chunk".to_string(),
                    )));
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let chunk: ChatChunk = match serde_json::from_str(line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            };

            if let Some(message) = chunk.error {
                self.finished = true;
                return Some(Err(ChatError::Model(message)));
            }
            if chunk.done {
                self.finished = true;
            }

            match chunk.message {
                Some(reply) if !reply.content.is_empty() => return Some(Ok(reply.content)),
                _ => continue,
            }
        }
        None
    }
}
