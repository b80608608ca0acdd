//! STOMP over WebSocket: the publish/subscribe transport for roster updates.

mod client;
mod frame;

pub use client::*;
pub use frame::*;

use thiserror::Error;

/// Transport and protocol errors.
#[derive(Error, Debug)]
pub enum StompError {
    #[error("Unknown STOMP command: {0:?}")]
    UnknownCommand(String),

    #[error("Malformed header: {0:?}")]
    BadHeader(String),

    #[error("Invalid header escape sequence: {0:?}")]
    BadEscape(String),

    #[error("Invalid content-length: {0:?}")]
    BadContentLength(String),

    #[error("Frame body not terminated by NUL")]
    MissingTerminator,

    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] async_tungstenite::tungstenite::Error),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Expected CONNECTED, got {0}")]
    UnexpectedFrame(Command),

    #[error("WebSocket not open within {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("No CONNECTED frame within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("Broker silent for {0:?}, heart-beat lost")]
    HeartbeatTimeout(std::time::Duration),

    #[error("Connection closed during handshake")]
    ClosedDuringHandshake,
}

pub type StompResult<T> = Result<T, StompError>;
