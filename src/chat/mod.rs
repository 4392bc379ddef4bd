//! Chat request handling.
//!
//! - [`request`]: GenerationRequest and ChatOptions
//! - [`adapter`]: Query-parameter defaults per endpoint
//! - [`model`]: The synchronous chat-model contract
//! - [`ollama`]: Ollama `/api/chat` implementation of that contract
//! - [`bridge`]: Runs blocking model calls on the worker pool
//! - [`error`]: Error type shared by the above

pub mod adapter;
pub mod bridge;
pub mod error;
pub mod model;
pub mod ollama;
pub mod request;
