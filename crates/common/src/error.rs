//! Unified error type for the standings server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Standings page not ready after {waited_secs}s: {url}")]
    PageNotReady { url: String, waited_secs: u64 },

    #[error("Standings fetch panicked: {0}")]
    FetchPanicked(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
