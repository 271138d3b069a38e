//! Client side of the signaling link
//!
//! Outbound envelopes are already signed by the [`PeerManager`]; the writer
//! task only serializes them. Inbound frames are sealed to this client's
//! key, so the reader opens them, optionally checks the server signature and
//! hands them to [`handle_server_envelope`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crypto::PublicKey;
use crate::envelope::{field, message_type, Envelope};
use crate::error::{Error, Result};
use crate::peer::{PeerEvent, PeerManager};
use crate::transport::websocket::{SignalingSink, SignalingStream};
use crate::transport::SignalingConnection;

/// Running signaling link: one writer task and one reader task
pub struct SignalingClient {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to `url` and start pumping frames
    ///
    /// `outbound` is the receiving end of the channel given to the manager.
    /// When `server_key` is set, server frames not signed by it are dropped.
    pub async fn connect(
        url: &str,
        outbound: mpsc::UnboundedReceiver<Envelope>,
        manager: Arc<PeerManager>,
        server_key: Option<PublicKey>,
    ) -> Result<Self> {
        let connection = SignalingConnection::connect(url).await?;
        let (sink, stream) = connection.split();
        info!(url, "connected to signaling server");

        let writer = tokio::spawn(write_loop(sink, outbound));
        let reader = tokio::spawn(read_loop(stream, manager, server_key));

        Ok(SignalingClient { writer, reader })
    }

    /// Wait until the server side of the link goes away
    pub async fn closed(self) {
        let _ = self.reader.await;
        self.writer.abort();
    }

    /// Stop both tasks
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop(mut sink: SignalingSink, mut outbound: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outbound.recv().await {
        debug!(message_type = envelope.message_type(), "sending to signaling server");
        if let Err(e) = sink.send_text(envelope.to_json()).await {
            warn!(error = %e, "signaling write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SignalingStream,
    manager: Arc<PeerManager>,
    server_key: Option<PublicKey>,
) {
    loop {
        let frame = match stream.next_text().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("signaling server closed the connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "signaling read failed");
                return;
            }
        };

        let envelope = match Envelope::open(&frame, manager.identity()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping unreadable signaling frame");
                continue;
            }
        };

        if let Some(key) = &server_key {
            if let Err(e) = envelope.verify(key) {
                warn!(error = %e, message_type = envelope.message_type(), "dropping frame not signed by the server");
                continue;
            }
        }

        if let Err(e) = handle_server_envelope(&manager, envelope) {
            warn!(error = %e, "dropping signaling message");
        }
    }
}

/// Route one opened server envelope to the manager
///
/// `Approval` starts an outbound connection on its own task so the
/// signaling reader is never blocked on a peer socket.
pub fn handle_server_envelope(manager: &Arc<PeerManager>, envelope: Envelope) -> Result<()> {
    match envelope.message_type() {
        message_type::INCOMING_REQUEST => {
            let from = envelope.require(field::FROM_USER_ID)?;
            let key = PublicKey::decode(envelope.require(field::REQUESTER_PUBLIC_KEY)?)?;
            manager.on_incoming_request(from, key);
        }
        message_type::APPROVAL => {
            let approver = envelope.require(field::USER)?.to_string();
            let details = envelope.require(field::CONNECTION_DETAILS)?.to_string();
            let key = PublicKey::decode(envelope.require(field::PUBLIC_KEY)?)?;

            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.on_approval_received(&approver, &details, key).await {
                    warn!(peer = %approver, error = %e, "failed to connect after approval");
                }
            });
        }
        message_type::REJECTION => {
            manager.on_rejected(envelope.require(field::USER)?);
        }
        message_type::CONFIRMATION => {
            manager.notify(PeerEvent::ServerConfirmation {
                message: envelope.require(field::MESSAGE)?.to_string(),
                user: envelope.field(field::USER).unwrap_or_default().to_string(),
            });
        }
        message_type::ERROR => {
            manager.notify(PeerEvent::ServerError {
                message: envelope.require(field::MESSAGE)?.to_string(),
            });
        }
        other => {
            return Err(Error::Protocol(format!("unexpected message type '{other}'")));
        }
    }
    Ok(())
}
