//! Crate-level error taxonomy
//!
//! Every failure is scoped to one session, one request or one link. None of
//! these variants is fatal to the process.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::transport::TransportError;

/// Errors surfaced by the signaling and peer layers
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed envelope, missing required field or unknown message type
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Signature missing or invalid, or the signer is unknown
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Bad key encoding or cipher failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Socket or framing failure on one link or session
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Approve/reject was called for a user with no pending incoming request
    #[error("No pending request from {0}")]
    NoPendingRequest(String),

    /// The signaling link is gone
    #[error("Signaling channel closed")]
    SignalingClosed,

    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for the signaling and peer layers
pub type Result<T> = std::result::Result<T, Error>;
