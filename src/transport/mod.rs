//! Transport layer
//!
//! Two transports carry parley traffic:
//! - newline-delimited text frames over TCP for direct peer links (`framing`)
//! - WebSocket text frames to the signaling server (`websocket`)
//!
//! The transport layer only moves text. Signing and encryption happen in the
//! envelope layer above it, which is why neither transport needs TLS.

use thiserror::Error;

pub mod framing;
pub mod websocket;

pub use framing::{write_frame, FrameReader, MAX_FRAME_LEN};
pub use websocket::SignalingConnection;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// A frame exceeded the size limit before its terminator arrived
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// The configured limit
        limit: usize,
    },

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
