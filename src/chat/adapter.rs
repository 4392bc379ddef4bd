//! Turns raw query parameters into [`GenerationRequest`]s.
//!
//! Absent and blank parameters always resolve to a default; adapting a
//! request never fails.

use std::fmt;

use crate::chat::request::{ChatOptions, GenerationRequest};
use crate::config::{ChatConfig, StuffConfig};

pub use crate::chat::request::{DEFAULT_PROMPT, DEFAULT_SYSTEM_PROMPT};

/// Default question for `/ask`.
pub const DEFAULT_QUESTION: &str = "北京的天气如何？";

/// Default question for `/prompt/ai/stuff`.
pub const DEFAULT_STUFF_MESSAGE: &str =
    "Which athletes won the mixed doubles gold medal in curling at the 2022 Winter Olympics?'";

/// Per-call options for `/client/custom/options`.
pub const CUSTOM_TEMPERATURE: f64 = 0.9;
pub const CUSTOM_TOP_P: f64 = 0.85;

/// Route prefix sharing one endpoint set with different defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Preconfigured client: default top-p/model and exchange logging.
    Client,
    /// Bare chat model: the model's own defaults.
    Model,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Client => "client",
            Namespace::Model => "model",
        }
    }

    /// Whether prompts and responses are logged for this namespace.
    pub fn logs_exchanges(&self) -> bool {
        matches!(self, Namespace::Client)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoints served under each [`Namespace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    SimpleChat,
    StreamChat,
    Chat,
    SseChat,
    WithSystemPrompt,
    CustomOptions,
}

/// `Some(value)` unless the parameter is absent or blank.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve a parameter against a chain of defaults, ending at [`DEFAULT_PROMPT`].
pub fn resolve(value: Option<String>, defaults: &[&str]) -> String {
    present(value)
        .or_else(|| {
            defaults
                .iter()
                .find(|d| !d.trim().is_empty())
                .map(|d| d.to_string())
        })
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string())
}

/// Builds requests for one namespace from the configured chat defaults.
#[derive(Debug, Clone)]
pub struct RequestAdapter {
    namespace: Namespace,
    chat: ChatConfig,
}

impl RequestAdapter {
    pub fn new(namespace: Namespace, chat: ChatConfig) -> Self {
        Self { namespace, chat }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Options every call in this namespace starts from.
    fn base_options(&self) -> ChatOptions {
        match self.namespace {
            Namespace::Client => self.chat.client_defaults(),
            Namespace::Model => ChatOptions::default(),
        }
    }

    pub fn adapt(&self, endpoint: Endpoint, user_prompt: Option<String>) -> GenerationRequest {
        let base = self.base_options();

        let request = match endpoint {
            Endpoint::SimpleChat | Endpoint::StreamChat => GenerationRequest::new(DEFAULT_PROMPT),
            Endpoint::Chat | Endpoint::SseChat => {
                GenerationRequest::new(resolve(user_prompt, &[DEFAULT_PROMPT]))
            }
            Endpoint::WithSystemPrompt => self.with_system_prompt(user_prompt),
            Endpoint::CustomOptions => {
                let per_call = match self.namespace {
                    Namespace::Client => ChatOptions {
                        temperature: Some(CUSTOM_TEMPERATURE),
                        top_p: Some(CUSTOM_TOP_P),
                        ..ChatOptions::default()
                    },
                    Namespace::Model => self.chat.configured_options(),
                };
                GenerationRequest::new(resolve(user_prompt, &[DEFAULT_PROMPT]))
                    .with_options(per_call)
            }
        };

        let options = request.options.clone().or(&base);
        request.with_options(options)
    }

    fn with_system_prompt(&self, user_prompt: Option<String>) -> GenerationRequest {
        match self.namespace {
            Namespace::Client => {
                GenerationRequest::new(resolve(user_prompt, &[DEFAULT_PROMPT]))
                    .with_system_prompt(DEFAULT_SYSTEM_PROMPT)
            }
            Namespace::Model => {
                let system = resolve(
                    Some(self.chat.system_prompt.clone()),
                    &[DEFAULT_SYSTEM_PROMPT],
                );
                GenerationRequest::new(resolve(
                    user_prompt,
                    &[self.chat.default_prompt.as_str(), DEFAULT_PROMPT],
                ))
                .with_system_prompt(system)
            }
        }
    }
}

/// Request for `/ask`.
pub fn ask(question: Option<String>) -> GenerationRequest {
    GenerationRequest::new(resolve(question, &[DEFAULT_QUESTION]))
}

/// Request for `/prompt/ai/stuff`: the question rendered into the stuffing template.
pub fn stuff(
    message: Option<String>,
    stuffit: bool,
    config: &StuffConfig,
    context: &str,
) -> GenerationRequest {
    let question = resolve(message, &[DEFAULT_STUFF_MESSAGE]);
    let context = if stuffit { context } else { "" };
    let prompt = render(&config.template, &[("context", context), ("question", &question)]);

    GenerationRequest::new(prompt).with_options(config.options())
}

/// Fill `{name}` placeholders in one pass; substituted text is never rescanned.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after_brace = &rest[start + 1..];
        let placeholder = vars.iter().find_map(|&(name, value)| {
            let tail = after_brace.strip_prefix(name)?.strip_prefix('}')?;
            Some((value, tail))
        });
        match placeholder {
            Some((value, tail)) => {
                out.push_str(value);
                rest = tail;
            }
            None => {
                out.push('{');
                rest = after_brace;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lenient boolean query value: anything but a recognised truthy value is `false`.
pub fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}
