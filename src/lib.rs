//! ollama-chat-bridge: chat endpoints over an Ollama chat model.
//!
//! Each endpoint turns query parameters into a generation request, runs the
//! synchronous model call on a bounded blocking worker pool, and returns
//! either the complete text or an SSE stream of fragments.

pub mod chat;
pub mod config;
pub mod server;
