//! One authenticated, encrypted channel to a remote user
//!
//! A link owns the write half of its socket and the conversation so far. The
//! read half lives in the receive task started by the manager; closing the
//! link aborts that task and shuts the write half down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinHandle;

use crate::crypto::PublicKey;
use crate::transport::{write_frame, TransportError, TransportResult};

/// One entry of a conversation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatLine {
    /// Author's user id
    pub from: String,
    /// Message text
    pub text: String,
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.from, self.text)
    }
}

/// A live channel to `remote_user_id`
pub struct PeerLink {
    remote_user_id: String,
    remote_key: PublicKey,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    history: parking_lot::Mutex<Vec<ChatLine>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
    established: AtomicBool,
}

impl PeerLink {
    pub(crate) fn new(
        remote_user_id: String,
        remote_key: PublicKey,
        writer: OwnedWriteHalf,
        established: bool,
    ) -> Self {
        PeerLink {
            remote_user_id,
            remote_key,
            writer: tokio::sync::Mutex::new(writer),
            history: parking_lot::Mutex::new(Vec::new()),
            reader: parking_lot::Mutex::new(None),
            stopped: AtomicBool::new(false),
            established: AtomicBool::new(established),
        }
    }

    /// The user on the other end
    pub fn remote_user_id(&self) -> &str {
        &self.remote_user_id
    }

    /// The key the remote user's frames are verified against
    pub fn remote_key(&self) -> &PublicKey {
        &self.remote_key
    }

    /// Snapshot of the conversation, oldest first
    pub fn history(&self) -> Vec<ChatLine> {
        self.history.lock().clone()
    }

    /// Whether traffic has flowed since the handshake
    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Whether [`PeerLink::close`] has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Returns true only for the call that flipped the flag
    pub(crate) fn mark_established(&self) -> bool {
        !self.established.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn record(&self, from: &str, text: &str) {
        self.history.lock().push(ChatLine {
            from: from.to_string(),
            text: text.to_string(),
        });
    }

    pub(crate) fn set_reader(&self, handle: JoinHandle<()>) {
        if self.is_stopped() {
            handle.abort();
            return;
        }
        *self.reader.lock() = Some(handle);
    }

    pub(crate) fn detach_reader(&self) {
        self.reader.lock().take();
    }

    pub(crate) async fn send_frame(&self, frame: &str) -> TransportResult<()> {
        if self.is_stopped() {
            return Err(TransportError::Disconnected);
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }

    /// Stop the receive task and shut the socket down. Safe to call twice.
    pub async fn close(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote_user_id", &self.remote_user_id)
            .field("remote_key", &self.remote_key.fingerprint())
            .field("established", &self.is_established())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
