//! Runtime configuration for ollama-chat-bridge.
//!
//! Configuration is loaded once at startup from a JSON file (missing file or
//! missing fields fall back to defaults), then adjusted by a few environment
//! variables and CLI flags. The resulting [`Config`] is immutable and shared
//! behind an `Arc`.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::chat::request::{ChatOptions, DEFAULT_PROMPT, DEFAULT_SYSTEM_PROMPT};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "ollama-chat-bridge", about = "Chat endpoints over an Ollama chat model")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides `server.listen`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream Ollama connection.
    pub ollama: OllamaConfig,

    /// Chat defaults (prompts and generation options).
    pub chat: ChatConfig,

    /// Blocking worker pool sizing.
    pub worker: WorkerConfig,

    /// Context-stuffing prompt endpoint.
    pub stuff: StuffConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Ollama API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the Ollama API.
    pub base_url: String,

    /// Model used when a request does not name one.
    pub model: String,

    /// Upper bound for a single upstream call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:0.5b".to_string(),
            request_timeout_secs: 300,
        }
    }
}

/// Default prompts and generation options for the chat endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Prompt used when the caller supplies none.
    pub default_prompt: String,

    /// System prompt for the `model` namespace.
    pub system_prompt: String,

    /// Model name for endpoints that set options explicitly.
    pub model: Option<String>,

    /// Top-p sampling threshold.
    pub top_p: f64,

    /// Sampling temperature.
    pub temperature: f64,

    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_prompt: DEFAULT_PROMPT.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: None,
            top_p: 0.7,
            temperature: 0.7,
            max_tokens: 256,
        }
    }
}

impl ChatConfig {
    /// Options applied to every call made through the `client` namespace.
    pub fn client_defaults(&self) -> ChatOptions {
        ChatOptions {
            top_p: Some(self.top_p),
            model: self.model.clone(),
            ..ChatOptions::default()
        }
    }

    /// Full option set built from configuration.
    pub fn configured_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            model: self.model.clone(),
            max_tokens: Some(self.max_tokens),
        }
    }
}

/// Blocking worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of model calls running at once.
    pub max_blocking_threads: usize,

    /// Fragments buffered per streaming response.
    pub channel_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_blocking_threads: 16,
            channel_capacity: 32,
        }
    }
}

/// Context-stuffing prompt settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StuffConfig {
    /// Question template with `{question}` and `{context}` placeholders.
    pub template: String,

    /// Document stuffed into the template when requested.
    pub context_path: Option<PathBuf>,

    /// Top-p for stuffed prompts.
    pub top_p: f64,

    /// Model for stuffed prompts.
    pub model: Option<String>,
}

impl Default for StuffConfig {
    fn default() -> Self {
        Self {
            template: "Use the following pieces of context to answer the question at the end. \
                       If you don't know the answer, just say that you don't know, \
                       don't try to make up an answer.\n\n{context}\n\nQuestion: {question}\nHelpful Answer:"
                .to_string(),
            context_path: Some(PathBuf::from("docs/wikipedia-curling.md")),
            top_p: 0.7,
            model: None,
        }
    }
}

impl StuffConfig {
    pub fn options(&self) -> ChatOptions {
        ChatOptions {
            top_p: Some(self.top_p),
            model: self.model.clone(),
            ..ChatOptions::default()
        }
    }

    /// Read the stuffing document. A missing document yields an empty context.
    pub fn load_context(&self) -> anyhow::Result<String> {
        match &self.context_path {
            Some(path) if path.exists() => Ok(std::fs::read_to_string(path)?),
            Some(path) => {
                tracing::warn!("Context document not found at {:?}, stuffing disabled", path);
                Ok(String::new())
            }
            None => Ok(String::new()),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply `OLLAMA_BASE_URL` / `OLLAMA_MODEL` and CLI overrides.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        self.apply_env(|key| std::env::var(key).ok());
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OLLAMA_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.ollama.base_url = url;
        }
        if let Some(model) = lookup("OLLAMA_MODEL").filter(|v| !v.trim().is_empty()) {
            self.ollama.model = model;
        }
    }
}
