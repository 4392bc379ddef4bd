//! The chat-model contract.
//!
//! Implementations are synchronous: `call` and the returned fragment iterator
//! may block on network I/O. They are only driven from the blocking worker
//! pool (see [`crate::chat::bridge`]), never from the async runtime.

use crate::chat::error::ChatError;
use crate::chat::request::GenerationRequest;

/// Lazy, finite sequence of text fragments in generation order.
pub type Fragments = Box<dyn Iterator<Item = Result<String, ChatError>> + Send>;

pub trait ChatModel: Send + Sync {
    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Run a generation to completion and return the full text.
    fn call(&self, request: &GenerationRequest) -> Result<String, ChatError>;

    /// Start a generation and return its fragments as they are produced.
    ///
    /// Errors that occur before the first fragment (connection refused,
    /// non-2xx status) are returned here rather than inside the iterator.
    fn stream(&self, request: &GenerationRequest) -> Result<Fragments, ChatError>;
}
