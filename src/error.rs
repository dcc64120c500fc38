use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid state: {0}")]
    BadState(String),

    #[error("Session not started: {0}")]
    NotStarted(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected to inspector")]
    NotConnected,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Inspector error {code}: {message}")]
    Protocol { code: i64, message: String },

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Spawn error: {0}")]
    Spawn(String),
}

impl Error {
    /// True for errors caused by the connection going away, as opposed to
    /// the remote end answering with a failure.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::NotConnected | Error::Transport(_))
    }
}
