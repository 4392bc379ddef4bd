use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("malformed upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed reading upstream stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ChatError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ChatError::Transport(e) => e.is_timeout(),
            ChatError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}
