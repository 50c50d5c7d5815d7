use std::io;
use thiserror::Error;

/// Main error type for the server
///
/// Only transport-level and setup failures live here. Request-level failures
/// (bad syntax, missing file, ...) are rendered into a response instead, see
/// [`crate::http::Outcome`].
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("request exceeds read buffer capacity ({0} bytes)")]
    RequestTooLarge(usize),

    #[error("response exceeds write buffer capacity ({0} bytes)")]
    ResponseTooLarge(usize),

    #[error("Event loop error: {0}")]
    EventLoop(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
