//! Peer connection manager
//!
//! Client-side counterpart of the signaling server. It tracks requests in
//! both directions, owns the listening socket for inbound links, dials out
//! when an approval arrives and keeps at most one [`PeerLink`] per remote
//! user.
//!
//! ```text
//!   requester                     signaling                     approver
//!   ---------                     ---------                     --------
//!   request_connection ──────────▶ forward ─────────────▶ on_incoming_request
//!                                                        approve_connection
//!   on_approval_received ◀──────── forward ◀──────────── (sealed host:port)
//!   connect, send Handshake ──────────────────────────────▶ accept loop
//!   ◀════════════════ sealed, signed Message frames ═══════════════▶
//! ```
//!
//! The tables are touched from the accept loop, the signaling reader and
//! application calls at once, so each is a concurrent map with per-key
//! atomicity and no lock spans an await.

use std::fmt;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dashmap::{DashMap, DashSet};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::crypto::{Identity, PublicKey};
use crate::envelope::{field, message_type, Envelope};
use crate::error::{Error, Result};
use crate::transport::{FrameReader, TransportError};

pub mod link;

pub use link::{ChatLine, PeerLink};

/// How long an inbound socket may take to send its handshake line
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where this client stands with one remote user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Nothing in flight
    NoRequest,
    /// We asked to connect and are waiting for an answer
    OutgoingRequested,
    /// Approval received; handshake sent, no traffic yet
    Connecting,
    /// They asked to connect; waiting for a local decision
    IncomingRequested,
    /// Link is live
    Connected,
    /// Link closed or request rejected
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::NoRequest => "no request",
            PeerState::OutgoingRequested => "outgoing request",
            PeerState::Connecting => "connecting",
            PeerState::IncomingRequested => "incoming request",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Notifications for whoever drives the manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    /// A user wants to connect; answer with approve or reject
    ConnectionRequested {
        /// The requester
        user_id: String,
    },
    /// A link to this user is up
    Connected {
        /// The remote user
        user_id: String,
    },
    /// A chat message arrived
    MessageReceived {
        /// The sender
        user_id: String,
        /// Message text
        text: String,
    },
    /// The link to this user went away
    Disconnected {
        /// The remote user
        user_id: String,
    },
    /// Our request was rejected
    Rejected {
        /// The user who rejected it
        user_id: String,
    },
    /// The signaling server confirmed something
    ServerConfirmation {
        /// Confirmation text
        message: String,
        /// User the confirmation refers to
        user: String,
    },
    /// The signaling server reported an error
    ServerError {
        /// Error text
        message: String,
    },
}

/// Tracks requests and live links for one local identity
pub struct PeerManager {
    user_id: String,
    identity: Identity,
    local_addr: SocketAddr,
    advertised_host: String,
    signaling: mpsc::UnboundedSender<Envelope>,
    events: mpsc::UnboundedSender<PeerEvent>,
    states: DashMap<String, PeerState>,
    outgoing: DashSet<String>,
    incoming: DashMap<String, PublicKey>,
    links: DashMap<String, Arc<PeerLink>>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PeerManager {
    /// Bind the peer listener and start accepting links
    ///
    /// Signed envelopes for the server are pushed to `signaling`; see
    /// [`SignalingClient`](crate::signaling::SignalingClient).
    pub async fn bind(
        config: &ClientConfig,
        identity: Identity,
        signaling: mpsc::UnboundedSender<Envelope>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(config.peer_listen_addr.as_str()).await?;
        let local_addr = listener.local_addr()?;
        let advertised_host = config
            .advertised_host
            .clone()
            .unwrap_or_else(|| detect_host(local_addr.ip()).to_string());

        let manager = Arc::new(PeerManager {
            user_id: config.user_id.clone(),
            identity,
            local_addr,
            advertised_host,
            signaling,
            events,
            states: DashMap::new(),
            outgoing: DashSet::new(),
            incoming: DashMap::new(),
            links: DashMap::new(),
            accept_task: parking_lot::Mutex::new(None),
        });

        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(&manager)));
        *manager.accept_task.lock() = Some(task);

        info!(
            user = %manager.user_id,
            addr = %local_addr,
            details = %manager.connection_details(),
            fingerprint = %manager.identity.public_key().fingerprint(),
            "peer listener ready"
        );
        Ok(manager)
    }

    /// Our user id
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Our identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Our public key
    pub fn public_key(&self) -> &PublicKey {
        self.identity.public_key()
    }

    /// Address the peer listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The `host:port` sent to approved requesters
    pub fn connection_details(&self) -> String {
        match self.advertised_host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.local_addr.port()).to_string(),
            Err(_) => format!("{}:{}", self.advertised_host, self.local_addr.port()),
        }
    }

    /// Current state towards `user_id`
    pub fn state(&self, user_id: &str) -> PeerState {
        self.states
            .get(user_id)
            .map(|state| *state)
            .unwrap_or(PeerState::NoRequest)
    }

    /// Users with a live link
    pub fn connected_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.links.iter().map(|entry| entry.key().clone()).collect();
        peers.sort();
        peers
    }

    /// Users whose requests await a local decision
    pub fn pending_incoming(&self) -> Vec<String> {
        let mut users: Vec<String> = self.incoming.iter().map(|entry| entry.key().clone()).collect();
        users.sort();
        users
    }

    /// Conversation with `user_id`, if a link exists
    pub fn history(&self, user_id: &str) -> Option<Vec<ChatLine>> {
        self.links.get(user_id).map(|link| link.history())
    }

    /// Announce our id and key to the signaling server
    pub fn register(&self) -> Result<()> {
        self.send_signaling(
            Envelope::new(message_type::REGISTER)
                .with_field(field::USER_ID, self.user_id.as_str())
                .with_field(field::PUBLIC_KEY, self.public_key().encode()),
        )
    }

    /// Ask the server to introduce us to `target`
    pub fn request_connection(&self, target: &str) -> Result<()> {
        self.outgoing.insert(target.to_string());
        self.states
            .insert(target.to_string(), PeerState::OutgoingRequested);
        info!(peer = %target, "requesting connection");

        self.send_signaling(
            Envelope::new(message_type::CONNECTION_REQUEST)
                .with_field(field::TARGET_USER_ID, target),
        )
    }

    /// Record a forwarded request from `from`
    pub fn on_incoming_request(&self, from: &str, requester_key: PublicKey) {
        self.incoming.insert(from.to_string(), requester_key);
        self.states
            .insert(from.to_string(), PeerState::IncomingRequested);
        info!(peer = %from, fingerprint = %requester_key.fingerprint(), "incoming connection request");
        self.notify(PeerEvent::ConnectionRequested {
            user_id: from.to_string(),
        });
    }

    /// Approve `requester` by sending it our address, sealed to its key
    ///
    /// The pending entry stays until the requester's handshake arrives, so
    /// approving again after a lost approval works.
    pub fn approve_connection(&self, requester: &str) -> Result<()> {
        let key = self
            .incoming
            .get(requester)
            .map(|key| *key)
            .ok_or_else(|| Error::NoPendingRequest(requester.to_string()))?;

        let details = self.connection_details();
        let sealed = BASE64.encode(key.encrypt(details.as_bytes())?);
        info!(peer = %requester, "approving connection");

        self.send_signaling(
            Envelope::new(message_type::CONNECTION_APPROVAL)
                .with_field(field::REQUESTER_USER_ID, requester)
                .with_field(field::CONNECTION_DETAILS, sealed),
        )
    }

    /// Drop `requester`'s pending request and tell the server
    pub fn reject_connection(&self, requester: &str) -> Result<()> {
        if self.incoming.remove(requester).is_none() {
            return Err(Error::NoPendingRequest(requester.to_string()));
        }
        self.states.insert(requester.to_string(), PeerState::NoRequest);
        info!(peer = %requester, "rejecting connection");

        self.send_signaling(
            Envelope::new(message_type::CONNECTION_REJECTION)
                .with_field(field::REQUESTER_USER_ID, requester),
        )
    }

    /// The server relayed a rejection of our request
    pub fn on_rejected(&self, approver: &str) {
        if self.outgoing.remove(approver).is_none() {
            debug!(peer = %approver, "rejection without outgoing request ignored");
            return;
        }
        self.states.insert(approver.to_string(), PeerState::Closed);
        info!(peer = %approver, "connection request rejected");
        self.notify(PeerEvent::Rejected {
            user_id: approver.to_string(),
        });
    }

    /// Dial the approver and send our handshake
    ///
    /// `connection_details` is base64 of `host:port` sealed to our key.
    pub async fn on_approval_received(
        self: &Arc<Self>,
        approver: &str,
        connection_details: &str,
        approver_key: PublicKey,
    ) -> Result<()> {
        if self.outgoing.remove(approver).is_none() {
            info!(peer = %approver, "approval without outgoing request ignored");
            return Ok(());
        }
        self.states
            .insert(approver.to_string(), PeerState::Connecting);

        match self.dial(approver, connection_details, approver_key).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.states.insert(approver.to_string(), PeerState::Closed);
                Err(e)
            }
        }
    }

    async fn dial(
        self: &Arc<Self>,
        approver: &str,
        connection_details: &str,
        approver_key: PublicKey,
    ) -> Result<()> {
        let sealed = BASE64
            .decode(connection_details)
            .map_err(|e| Error::Protocol(format!("connection details are not base64: {e}")))?;
        let address = String::from_utf8(self.identity.decrypt(&sealed)?)
            .map_err(|_| Error::Protocol("connection details are not UTF-8".to_string()))?;

        info!(peer = %approver, %address, "connecting to peer");
        let stream = TcpStream::connect(address.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{address}: {e}")))?;
        let (read, write) = stream.into_split();

        let handshake = Envelope::new(message_type::HANDSHAKE)
            .with_field(field::USER_ID, self.user_id.as_str())
            .sign(&self.identity)
            .seal(&approver_key)?;

        let link = Arc::new(PeerLink::new(approver.to_string(), approver_key, write, false));
        link.send_frame(&handshake).await?;

        self.install_link(link, FrameReader::new(read)).await;
        self.notify(PeerEvent::Connected {
            user_id: approver.to_string(),
        });
        Ok(())
    }

    /// Verify the first line of an inbound socket and adopt it as a link
    async fn accept_handshake(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        let (read, write) = stream.into_split();
        let mut reader = FrameReader::new(read);

        let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.next_frame())
            .await
            .map_err(|_| Error::Authentication("handshake timed out".to_string()))??
            .ok_or(TransportError::Disconnected)?;

        let envelope = Envelope::open(&frame, &self.identity)?;
        if envelope.message_type() != message_type::HANDSHAKE {
            return Err(Error::Protocol(format!(
                "expected handshake, got '{}'",
                envelope.message_type()
            )));
        }
        let user = envelope.require(field::USER_ID)?.to_string();

        // Taking the entry admits at most one handshake per request
        let (_, key) = self
            .incoming
            .remove(&user)
            .ok_or_else(|| Error::Authentication(format!("no pending request from {user}")))?;
        if let Err(e) = envelope.verify(&key) {
            // A forged handshake must not cost the real requester its entry
            self.incoming.entry(user).or_insert(key);
            return Err(e);
        }

        let link = Arc::new(PeerLink::new(user.clone(), key, write, true));
        self.install_link(link, reader).await;
        self.states.insert(user.clone(), PeerState::Connected);
        info!(peer = %user, "accepted peer link");
        self.notify(PeerEvent::Connected { user_id: user });
        Ok(())
    }

    async fn install_link(self: &Arc<Self>, link: Arc<PeerLink>, reader: FrameReader<OwnedReadHalf>) {
        let user = link.remote_user_id().to_string();
        if let Some(old) = self.links.insert(user.clone(), link.clone()) {
            debug!(peer = %user, "replacing existing link");
            old.close().await;
        }

        let task = tokio::spawn(receive_loop(Arc::downgrade(self), link.clone(), reader));
        link.set_reader(task);
    }

    /// Send `text` to `user_id` over its link
    ///
    /// Without a link the message is logged and dropped. A write failure
    /// closes the link and is returned.
    pub async fn send_message(&self, user_id: &str, text: &str) -> Result<()> {
        let Some(link) = self.links.get(user_id).map(|link| link.clone()) else {
            warn!(peer = %user_id, "no active connection; message dropped");
            return Ok(());
        };

        let frame = Envelope::new(message_type::MESSAGE)
            .with_field(field::MESSAGE, text)
            .with_field(field::TO_USER_ID, user_id)
            .sign(&self.identity)
            .seal(link.remote_key())?;

        if let Err(e) = link.send_frame(&frame).await {
            warn!(peer = %user_id, error = %e, "peer link write failed");
            self.drop_link(&link).await;
            return Err(e.into());
        }

        link.record(&self.user_id, text);
        self.mark_established(&link);
        Ok(())
    }

    /// Close the link to `user_id`, if any
    pub async fn close_link(&self, user_id: &str) {
        if let Some((_, link)) = self.links.remove(user_id) {
            link.close().await;
            self.states.insert(user_id.to_string(), PeerState::Closed);
            info!(peer = %user_id, "closed peer link");
        }
    }

    /// Stop accepting and close every link
    pub async fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        for user in self.connected_peers() {
            self.close_link(&user).await;
        }
    }

    pub(crate) fn notify(&self, event: PeerEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn send_signaling(&self, envelope: Envelope) -> Result<()> {
        self.signaling
            .send(envelope.sign(&self.identity))
            .map_err(|_| Error::SignalingClosed)
    }

    fn mark_established(&self, link: &PeerLink) {
        if link.mark_established() {
            self.states
                .insert(link.remote_user_id().to_string(), PeerState::Connected);
        }
    }

    /// Open, verify and record one inbound chat frame
    fn accept_frame(&self, link: &PeerLink, frame: &str) -> Result<String> {
        let envelope = Envelope::open(frame, &self.identity)?;
        envelope.verify(link.remote_key())?;
        if envelope.message_type() != message_type::MESSAGE {
            return Err(Error::Protocol(format!(
                "unexpected message type '{}' on peer link",
                envelope.message_type()
            )));
        }
        let text = envelope.require(field::MESSAGE)?.to_string();

        link.record(link.remote_user_id(), &text);
        self.mark_established(link);
        Ok(text)
    }

    /// Remove `link` if it is still the current one and report it gone
    async fn drop_link(&self, link: &Arc<PeerLink>) {
        let user = link.remote_user_id();
        let removed = self
            .links
            .remove_if(user, |_, current| Arc::ptr_eq(current, link))
            .is_some();

        if removed {
            self.states.insert(user.to_string(), PeerState::Closed);
            self.notify(PeerEvent::Disconnected {
                user_id: user.to_string(),
            });
        }
        link.close().await;
    }
}

impl fmt::Debug for PeerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerManager")
            .field("user_id", &self.user_id)
            .field("local_addr", &self.local_addr)
            .field("links", &self.links.len())
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, manager: Weak<PeerManager>) {
    while let Ok((stream, addr)) = listener.accept().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        debug!(%addr, "inbound peer connection");
        tokio::spawn(async move {
            // Dropping the stream on failure closes the socket
            if let Err(e) = manager.accept_handshake(stream).await {
                warn!(%addr, error = %e, "rejected inbound peer connection");
            }
        });
    }
}

async fn receive_loop(
    manager: Weak<PeerManager>,
    link: Arc<PeerLink>,
    mut reader: FrameReader<OwnedReadHalf>,
) {
    let peer = link.remote_user_id().to_string();

    while !link.is_stopped() {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(%peer, "peer closed the link");
                break;
            }
            // The whole line was consumed, so the stream is still in step
            Err(TransportError::InvalidData(e)) => {
                warn!(%peer, error = %e, "dropping undecodable frame");
                continue;
            }
            Err(e) => {
                info!(%peer, error = %e, "peer link read failed");
                break;
            }
        };

        let Some(manager) = manager.upgrade() else {
            return;
        };
        match manager.accept_frame(&link, &frame) {
            Ok(text) => manager.notify(PeerEvent::MessageReceived {
                user_id: peer.clone(),
                text,
            }),
            // One bad frame does not end an otherwise healthy link
            Err(e) => warn!(%peer, error = %e, "dropping bad frame"),
        }
    }

    // Ending on our own; closing the link must not abort this task
    link.detach_reader();
    if let Some(manager) = manager.upgrade() {
        manager.drop_link(&link).await;
    }
}

/// First non-loopback local address, else loopback
///
/// The UDP connect only selects a route; nothing is sent.
fn detect_host(bound: IpAddr) -> IpAddr {
    if !bound.is_unspecified() && !bound.is_loopback() {
        return bound;
    }
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("192.0.2.1:9")?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_loopback() && !ip.is_unspecified() => ip,
        _ => IpAddr::from([127, 0, 0, 1]),
    }
}
