//! HTTP server exposing the chat endpoints.
//!
//! - [`chat_api`]: Route table, query types and handlers
//! - [`streaming`]: SSE streaming for fragment-by-fragment responses
//! - [`error`]: Error-to-response mapping

pub mod chat_api;
pub mod error;
pub mod streaming;
