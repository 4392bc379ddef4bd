//! Per-request unit of work handed to the chat model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prompt used when the caller supplies none, and when every configured
/// default prompt is blank.
pub const DEFAULT_PROMPT: &str = "你好，介绍下你自己！请用中文回答。";

/// System prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的助手，请用中文回答。";

/// Generation parameters. `None` leaves the choice to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Sampling temperature.
    pub temperature: Option<f64>,

    /// Top-p (nucleus) sampling threshold.
    pub top_p: Option<f64>,

    /// Model identifier.
    pub model: Option<String>,

    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    /// Fill every unset field from `defaults`. Fields already set win.
    pub fn or(self, defaults: &ChatOptions) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            model: self.model.or_else(|| defaults.model.clone()),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
        }
    }
}

/// A generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Unique request ID, used for log correlation.
    pub request_id: String,

    /// User prompt. Never empty.
    pub prompt: String,

    /// Optional system prompt placed before the user prompt.
    pub system_prompt: Option<String>,

    /// Generation options for this call.
    pub options: ChatOptions,
}

impl GenerationRequest {
    /// Create a request. A blank prompt is replaced by [`DEFAULT_PROMPT`].
    pub fn new(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let prompt = if prompt.trim().is_empty() {
            DEFAULT_PROMPT.to_string()
        } else {
            prompt
        };

        Self {
            request_id: Uuid::new_v4().to_string(),
            prompt,
            system_prompt: None,
            options: ChatOptions::default(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}
