//! Error types for Herald

/// Main error type for Herald operations
#[derive(Debug, thiserror::Error)]
pub enum HeraldError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Downstream error: {0}")]
    Downstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement From conversions for common error types

impl From<std::io::Error> for HeraldError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HeraldError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for HeraldError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("JSON error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for HeraldError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(format!("MessagePack error: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for HeraldError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Internal(format!("MessagePack encode error: {}", err))
    }
}

/// Result type alias for Herald operations
pub type Result<T> = std::result::Result<T, HeraldError>;
