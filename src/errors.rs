//! Error types for the check-in agent

use std::fmt;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug)]
pub enum AgentError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP client could not be built or a request failed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Cookie file could not be read or parsed
    Cookie(String),

    /// The agent's request channel is closed
    Channel(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Io(err) => write!(f, "IO error: {}", err),
            AgentError::Http(err) => write!(f, "HTTP error: {}", err),
            AgentError::Json(err) => write!(f, "JSON error: {}", err),
            AgentError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AgentError::Cookie(msg) => write!(f, "Cookie error: {}", msg),
            AgentError::Channel(msg) => write!(f, "Channel error: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Io(err) => Some(err),
            AgentError::Http(err) => Some(err),
            AgentError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err)
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Http(err)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Json(err)
    }
}
