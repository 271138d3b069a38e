//! # parley
//!
//! Rendezvous signaling and direct, end-to-end encrypted peer links.
//!
//! ## Features
//!
//! - **Signaling server** that introduces users without seeing their chat
//! - **Signed, sealed envelopes** on every hop, so no transport needs TLS
//! - **Approval handshake**: a peer's address is only revealed to a requester
//!   it approved
//! - **Direct peer links** over TCP once both sides agree
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::{Envelope, Identity};
//!
//! let alice = Identity::generate();
//! let bob = Identity::generate();
//!
//! // Signed by Alice, readable only by Bob
//! let frame = Envelope::new("Message")
//!     .with_field("message", "hello")
//!     .sign(&alice)
//!     .seal(bob.public_key())
//!     .unwrap();
//!
//! let opened = Envelope::open(&frame, &bob).unwrap();
//! assert!(opened.verify(alice.public_key()).is_ok());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │      parley (client)  |  parley-signal      │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │              PROTOCOL LAYER                 │
//! │  PeerManager | SignalingServer | Registry   │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │           ENVELOPE + CRYPTO LAYER           │
//! │  Ed25519 | X25519 | ChaCha20-Poly1305 | BLAKE3
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │     WebSocket (signaling) | TCP (peers)     │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod peer;
pub mod registry;
pub mod signaling;
pub mod transport;

// Re-export main types at crate root
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use crypto::{CryptoError, CryptoResult, Identity, PublicKey, SignatureBytes};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use peer::{ChatLine, PeerEvent, PeerLink, PeerManager, PeerState};
pub use registry::BiMap;
pub use signaling::{SessionId, SignalingClient, SignalingServer};
