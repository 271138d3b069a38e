//! Signaling: the rendezvous server and the client side of its link
//!
//! - `server`: the message state machine, independent of any transport
//! - `websocket`: accepts WebSocket connections and drives the server
//! - `client`: connects a [`PeerManager`](crate::peer::PeerManager) to a server

use std::fmt;

pub mod client;
pub mod server;
pub mod websocket;

pub use client::{handle_server_envelope, SignalingClient};
pub use server::SignalingServer;
pub use websocket::serve;

/// Opaque handle for one signaling transport connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}
