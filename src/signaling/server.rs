//! Signaling server state machine
//!
//! One `SignalingServer` is shared by every open session. The transport
//! container calls [`SignalingServer::on_session_open`],
//! [`SignalingServer::on_session_message`] and
//! [`SignalingServer::on_session_close`] from its own tasks, possibly for
//! many sessions at once, so all tables are concurrent maps and no lock is
//! held across a send.
//!
//! Every reply is signed with the server identity and sealed to the
//! recipient's registered key before it reaches the outbound channel.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::SessionId;
use crate::crypto::{Identity, PublicKey};
use crate::envelope::{field, message_type, Envelope};
use crate::error::{Error, Result};
use crate::registry::BiMap;

/// Confirmation text for a successful registration
pub const REGISTERED: &str = "Registered user.";

/// Confirmation text for a connection request, whatever became of it
pub const REQUEST_SENT: &str = "The request has been sent if the client is online.";

/// Error text for any authentication failure
pub const INVALID_SIGNATURE: &str = "Invalid signature.";

/// Error text for an unrecognized message type
pub const UNKNOWN_MESSAGE_TYPE: &str =
    "Invalid message format: Value of 'messageType' is not recognized.";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PendingKey {
    target: String,
    requester: String,
}

/// An unanswered request and the two sessions it was made between
#[derive(Clone, Copy, Debug)]
struct PendingRequest {
    requester_key: PublicKey,
    requester_session: SessionId,
    target_session: SessionId,
}

/// A user's key, tagged with the session that registered it
#[derive(Clone, Copy, Debug)]
struct Registration {
    session: SessionId,
    key: PublicKey,
}

/// The rendezvous service: introduces users and relays their handshake
pub struct SignalingServer {
    identity: Identity,
    next_session: AtomicU64,
    sessions: DashMap<SessionId, mpsc::UnboundedSender<String>>,
    registry: BiMap<String, SessionId>,
    public_keys: DashMap<String, Registration>,
    pending: DashMap<PendingKey, PendingRequest>,
}

impl SignalingServer {
    /// Create a server that signs its replies with `identity`
    pub fn new(identity: Identity) -> Self {
        SignalingServer {
            identity,
            next_session: AtomicU64::new(1),
            sessions: DashMap::new(),
            registry: BiMap::new(),
            public_keys: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// The key clients can pin to verify server replies
    pub fn public_key(&self) -> &PublicKey {
        self.identity.public_key()
    }

    /// A transport connection was accepted
    ///
    /// Frames for this session are pushed to `outbound`; the transport is
    /// expected to write them out in order.
    pub fn on_session_open(&self, outbound: mpsc::UnboundedSender<String>) -> SessionId {
        let session = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(session, outbound);
        debug!(%session, "session opened");
        session
    }

    /// A text frame arrived on `session`
    pub fn on_session_message(&self, session: SessionId, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%session, error = %e, "malformed envelope");
                self.reply_error(session, None, &error_text(&e));
                return;
            }
        };

        let signer_key = match self.authenticate(session, &envelope) {
            Ok(key) => key,
            Err(e) => {
                warn!(%session, message_type = envelope.message_type(), error = %e, "rejected envelope");
                self.reply_error(session, Some(&envelope), INVALID_SIGNATURE);
                return;
            }
        };

        let result = match envelope.message_type() {
            message_type::REGISTER => self.handle_register(session, &envelope, signer_key),
            message_type::CONNECTION_REQUEST => self.handle_connection_request(session, &envelope),
            message_type::CONNECTION_APPROVAL => {
                self.handle_connection_approval(session, &envelope)
            }
            message_type::CONNECTION_REJECTION => {
                self.handle_connection_rejection(session, &envelope)
            }
            _ => Err(Error::Protocol(UNKNOWN_MESSAGE_TYPE.to_string())),
        };

        if let Err(e) = result {
            warn!(%session, message_type = envelope.message_type(), error = %e, "request failed");
            self.reply_error(session, Some(&envelope), &error_text(&e));
        }
    }

    /// The transport connection for `session` is gone
    pub fn on_session_close(&self, session: SessionId) {
        self.sessions.remove(&session);

        // A session already evicted by a newer registration no longer owns
        // its user id, so there is nothing of that user's to clean up here.
        match self.registry.remove_by_value(&session) {
            Some(user) => {
                self.forget_user(&user, session);
                info!(%session, user = %user, "session closed");
            }
            None => debug!(%session, "unregistered session closed"),
        }
    }

    /// The user currently bound to `session`
    pub fn user_for_session(&self, session: SessionId) -> Option<String> {
        self.registry.key_for(&session)
    }

    /// The session currently bound to `user`
    pub fn session_for_user(&self, user: &str) -> Option<SessionId> {
        self.registry.value_for(&user.to_string())
    }

    /// The registered key for `user`
    pub fn public_key_for(&self, user: &str) -> Option<PublicKey> {
        self.public_keys.get(user).map(|entry| entry.key)
    }

    /// Whether `requester` has an unanswered request to `target`
    pub fn has_pending(&self, target: &str, requester: &str) -> bool {
        self.pending.contains_key(&PendingKey {
            target: target.to_string(),
            requester: requester.to_string(),
        })
    }

    /// Number of unanswered requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn authenticate(&self, session: SessionId, envelope: &Envelope) -> Result<PublicKey> {
        let key = if envelope.message_type() == message_type::REGISTER {
            // Trust on first registration: the envelope vouches for itself
            envelope.require(field::USER_ID)?;
            PublicKey::decode(envelope.require(field::PUBLIC_KEY)?)
                .map_err(|e| Error::Authentication(format!("bad public key: {e}")))?
        } else {
            self.session_key(session)
                .ok_or_else(|| Error::Authentication("session is not registered".to_string()))?
        };

        envelope.verify(&key)?;
        Ok(key)
    }

    fn handle_register(&self, session: SessionId, envelope: &Envelope, key: PublicKey) -> Result<()> {
        let user = envelope.require(field::USER_ID)?.trim().to_string();
        if user.is_empty() {
            return Err(Error::Protocol("Invalid message format: 'userId' is empty.".to_string()));
        }

        if let Some(previous) = self.registry.key_for(&session) {
            if previous != user {
                self.forget_user(&previous, session);
            }
        }

        let evicted = self.registry.put(user.clone(), session);
        if let Some(old_session) = evicted.previous_value {
            info!(user = %user, %old_session, new_session = %session, "user re-registered from a new session");
        }

        let registration = Registration { session, key };
        if let Some(old) = self.public_keys.insert(user.clone(), registration) {
            if old.key != key {
                self.sweep_pending(&user);
            }
        }

        info!(user = %user, %session, fingerprint = %key.fingerprint(), "registered");
        self.reply(
            session,
            Envelope::new(message_type::CONFIRMATION)
                .with_field(field::MESSAGE, REGISTERED)
                .with_field(field::USER, user),
        );
        Ok(())
    }

    fn handle_connection_request(&self, session: SessionId, envelope: &Envelope) -> Result<()> {
        let requester = self.bound_user(session)?;
        let target = envelope.require(field::TARGET_USER_ID)?.to_string();

        self.forward_request(session, &requester, &target);

        // Same reply whether or not the target exists
        self.reply(
            session,
            Envelope::new(message_type::CONFIRMATION)
                .with_field(field::MESSAGE, REQUEST_SENT)
                .with_field(field::USER, target),
        );
        Ok(())
    }

    fn forward_request(&self, session: SessionId, requester: &str, target: &str) {
        if requester == target {
            debug!(user = %requester, "ignoring connection request to self");
            return;
        }
        let Some(target_session) = self.session_for_user(target) else {
            debug!(requester = %requester, target = %target, "connection request target not found");
            return;
        };
        let (Some(target_key), Some(requester_key)) =
            (self.public_key_for(target), self.public_key_for(requester))
        else {
            debug!(requester = %requester, target = %target, "connection request missing keys");
            return;
        };

        let pending = PendingKey {
            target: target.to_string(),
            requester: requester.to_string(),
        };
        // Recorded before forwarding so a fast approval cannot miss it
        self.pending.insert(
            pending.clone(),
            PendingRequest {
                requester_key,
                requester_session: session,
                target_session,
            },
        );

        let forwarded = Envelope::new(message_type::INCOMING_REQUEST)
            .with_field(field::FROM_USER_ID, requester)
            .with_field(field::REQUESTER_PUBLIC_KEY, requester_key.encode());

        if self.deliver(target_session, forwarded, &target_key) {
            info!(requester = %requester, target = %target, "forwarded connection request");
        } else {
            self.pending.remove(&pending);
        }
    }

    fn handle_connection_approval(&self, session: SessionId, envelope: &Envelope) -> Result<()> {
        let approver = self.bound_user(session)?;
        let requester = envelope.require(field::REQUESTER_USER_ID)?.to_string();
        let details = envelope.require(field::CONNECTION_DETAILS)?;

        let pending = PendingKey {
            target: approver.clone(),
            requester: requester.clone(),
        };
        // Taking the entry is the guard: of two racing approvals only one
        // finds it. It goes back if the approval cannot be delivered.
        let Some((_, request)) = self.pending.remove(&pending) else {
            info!(approver = %approver, requester = %requester, "approval without matching request dropped");
            return Ok(());
        };

        let (Some(requester_session), Some(requester_key), Some(approver_key)) = (
            self.session_for_user(&requester),
            self.public_key_for(&requester),
            self.public_key_for(&approver),
        ) else {
            info!(approver = %approver, requester = %requester, "approval for offline requester dropped");
            self.restore_pending(pending, request);
            return Ok(());
        };

        let approval = Envelope::new(message_type::APPROVAL)
            .with_field(field::USER, approver.as_str())
            .with_field(field::CONNECTION_DETAILS, details)
            .with_field(field::PUBLIC_KEY, approver_key.encode());

        if self.deliver(requester_session, approval, &requester_key) {
            info!(approver = %approver, requester = %requester, "forwarded connection approval");
        } else {
            self.restore_pending(pending, request);
        }
        Ok(())
    }

    /// Put back a request whose approval could not be delivered
    ///
    /// Inserted first and checked after, so a concurrent close of the
    /// requester's session either sees the entry and sweeps it or is seen here.
    fn restore_pending(&self, pending: PendingKey, request: PendingRequest) {
        let owner = request.requester_session;
        self.pending.entry(pending.clone()).or_insert(request);
        if !self.sessions.contains_key(&owner) {
            self.pending
                .remove_if(&pending, |_, current| current.requester_session == owner);
        }
    }

    fn handle_connection_rejection(&self, session: SessionId, envelope: &Envelope) -> Result<()> {
        let approver = self.bound_user(session)?;
        let requester = envelope.require(field::REQUESTER_USER_ID)?.to_string();

        let pending = PendingKey {
            target: approver.clone(),
            requester: requester.clone(),
        };
        if self.pending.remove(&pending).is_none() {
            info!(approver = %approver, requester = %requester, "rejection without matching request dropped");
            return Ok(());
        }

        if let (Some(requester_session), Some(requester_key)) = (
            self.session_for_user(&requester),
            self.public_key_for(&requester),
        ) {
            let rejection =
                Envelope::new(message_type::REJECTION).with_field(field::USER, approver.as_str());
            self.deliver(requester_session, rejection, &requester_key);
        }
        info!(approver = %approver, requester = %requester, "connection request rejected");
        Ok(())
    }

    fn bound_user(&self, session: SessionId) -> Result<String> {
        self.registry
            .key_for(&session)
            .ok_or_else(|| Error::Authentication("session is not registered".to_string()))
    }

    /// The key registered by `session` for the user it is bound to
    fn session_key(&self, session: SessionId) -> Option<PublicKey> {
        let user = self.registry.key_for(&session)?;
        self.public_keys
            .get(&user)
            .filter(|entry| entry.session == session)
            .map(|entry| entry.key)
    }

    /// Drop what `session` registered for `user`
    ///
    /// A newer session may already have re-registered `user`; its key and
    /// requests are left alone.
    fn forget_user(&self, user: &str, session: SessionId) {
        if self
            .public_keys
            .remove_if(user, |_, entry| entry.session == session)
            .is_none()
        {
            debug!(user = %user, %session, "key already owned by a newer session");
        }
        self.pending.retain(|key, request| {
            let as_target = key.target == user && request.target_session == session;
            let as_requester = key.requester == user && request.requester_session == session;
            !(as_target || as_requester)
        });
    }

    fn sweep_pending(&self, user: &str) {
        self.pending
            .retain(|key, _| key.target != user && key.requester != user);
    }

    /// Sign, seal to `key` and queue on `session`. Returns whether it was queued.
    fn deliver(&self, session: SessionId, envelope: Envelope, key: &PublicKey) -> bool {
        let frame = match envelope.sign(&self.identity).seal(key) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%session, error = %e, "failed to seal outbound envelope");
                return false;
            }
        };

        let Some(outbound) = self.sessions.get(&session).map(|tx| tx.clone()) else {
            debug!(%session, "session gone before delivery");
            return false;
        };
        outbound.send(frame).is_ok()
    }

    fn reply(&self, session: SessionId, envelope: Envelope) -> bool {
        match self.session_key(session) {
            Some(key) => self.deliver(session, envelope, &key),
            None => {
                debug!(%session, "no key to seal reply to");
                false
            }
        }
    }

    /// Send an `Error`. Sessions without a registered key can still get one
    /// when the offending envelope was a `Register` carrying a usable key.
    fn reply_error(&self, session: SessionId, envelope: Option<&Envelope>, message: &str) {
        let error = Envelope::new(message_type::ERROR).with_field(field::MESSAGE, message);

        let registered = self.session_key(session);
        let claimed = envelope
            .filter(|env| env.message_type() == message_type::REGISTER)
            .and_then(|env| env.field(field::PUBLIC_KEY))
            .and_then(|encoded| PublicKey::decode(encoded).ok());

        match registered.or(claimed) {
            Some(key) => {
                self.deliver(session, error, &key);
            }
            None => debug!(%session, message, "no key to seal error to"),
        }
    }
}

fn error_text(err: &Error) -> String {
    match err {
        Error::Protocol(message) => message.clone(),
        Error::Authentication(_) => INVALID_SIGNATURE.to_string(),
        other => other.to_string(),
    }
}
