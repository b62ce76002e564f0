//! Error types for the RTK bridge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtkError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("NTRIP handshake refused: {0}")]
    HandshakeRefused(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RtkError>;
