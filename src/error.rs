use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

/// Error payload carried by `error` server events.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A `function_call` whose arguments fail to parse or validate. Recoverable:
    /// the event loop keeps running and the UI shows an error state instead.
    #[error("Malformed tool invocation: {0}")]
    MalformedToolInvocation(String),

    #[error("The session is not active")]
    SessionClosed,

    #[error("Invalid setting: {0}")]
    InvalidSettings(String),
}

pub type Result<T> = std::result::Result<T, Error>;
