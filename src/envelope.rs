//! Signed message envelopes
//!
//! An envelope is a message type plus a flat map of string fields, optionally
//! carrying a signature. On the wire it is a single JSON object:
//!
//! ```text
//! {"messageType":"Connection request","signature":"<base64>","targetUserId":"bob"}
//! ```
//!
//! The signature covers the canonical form: the same object without the
//! `signature` key, keys sorted, no whitespace. Sorting makes the bytes
//! independent of the order fields were added in.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

use crate::crypto::{CryptoError, Identity, PublicKey, SignatureBytes};
use crate::error::{Error, Result};

/// Key holding the message type in the JSON object
pub const MESSAGE_TYPE_KEY: &str = "messageType";

/// Key holding the signature in the JSON object
pub const SIGNATURE_KEY: &str = "signature";

/// Message type names used on the signaling link and on peer links
pub mod message_type {
    /// Client registers its user id and public key
    pub const REGISTER: &str = "Register";
    /// Client asks to be introduced to another user
    pub const CONNECTION_REQUEST: &str = "Connection request";
    /// Target approves a pending request and sends its sealed address
    pub const CONNECTION_APPROVAL: &str = "Connection approval";
    /// Target declines a pending request
    pub const CONNECTION_REJECTION: &str = "Connection rejection";

    /// Server acknowledges a request
    pub const CONFIRMATION: &str = "Confirmation";
    /// Server reports a failure
    pub const ERROR: &str = "Error";
    /// Server forwards a connection request to its target
    pub const INCOMING_REQUEST: &str = "connectionRequest";
    /// Server forwards an approval to the requester
    pub const APPROVAL: &str = "Approval";
    /// Server forwards a rejection to the requester
    pub const REJECTION: &str = "Rejection";

    /// First line on a peer link, proves the connecting side's identity
    pub const HANDSHAKE: &str = "Handshake";
    /// Chat message on a peer link
    pub const MESSAGE: &str = "Message";
}

/// Field names shared by the signaling server and clients
pub mod field {
    #![allow(missing_docs)]
    pub const USER_ID: &str = "userId";
    pub const PUBLIC_KEY: &str = "publicKey";
    pub const TARGET_USER_ID: &str = "targetUserId";
    pub const REQUESTER_USER_ID: &str = "requesterUserId";
    pub const CONNECTION_DETAILS: &str = "connectionDetails";
    pub const MESSAGE: &str = "message";
    pub const USER: &str = "user";
    pub const FROM_USER_ID: &str = "fromUserId";
    pub const REQUESTER_PUBLIC_KEY: &str = "requesterPublicKey";
    pub const TO_USER_ID: &str = "toUserId";
}

fn is_reserved(key: &str) -> bool {
    key == MESSAGE_TYPE_KEY || key == SIGNATURE_KEY
}

/// A protocol message: type, string fields, optional signature
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    message_type: String,
    fields: BTreeMap<String, String>,
    signature: Option<String>,
}

impl Envelope {
    /// Create an unsigned envelope with no fields
    pub fn new(message_type: impl Into<String>) -> Self {
        Envelope {
            message_type: message_type.into(),
            fields: BTreeMap::new(),
            signature: None,
        }
    }

    /// Add a field
    ///
    /// `messageType` and `signature` are reserved and ignored here.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        debug_assert!(!is_reserved(&key), "reserved envelope key: {key}");
        if !is_reserved(&key) {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// The message type
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Look up a field
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Look up a field that must be present
    pub fn require(&self, key: &str) -> Result<&str> {
        self.field(key).ok_or_else(|| {
            Error::Protocol(format!(
                "Invalid message format: '{}' missing from '{}'.",
                key, self.message_type
            ))
        })
    }

    /// All fields, sorted by key
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// The encoded signature, if any
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    fn to_object(&self, include_signature: bool) -> serde_json::Map<String, Value> {
        let mut sorted: BTreeMap<&str, &str> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        sorted.insert(MESSAGE_TYPE_KEY, &self.message_type);
        if include_signature {
            if let Some(signature) = &self.signature {
                sorted.insert(SIGNATURE_KEY, signature);
            }
        }

        sorted
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    /// Canonical bytes covered by the signature
    pub fn canonical_bytes(&self) -> Vec<u8> {
        Value::Object(self.to_object(false)).to_string().into_bytes()
    }

    /// Sign with `identity`, replacing any previous signature
    pub fn sign(mut self, identity: &Identity) -> Self {
        let signature = identity.sign(&self.canonical_bytes());
        self.signature = Some(signature.encode());
        self
    }

    /// Check the signature against `key`
    pub fn verify(&self, key: &PublicKey) -> Result<()> {
        let encoded = self
            .signature
            .as_deref()
            .ok_or_else(|| Error::Authentication("signature missing".to_string()))?;
        let signature = SignatureBytes::decode(encoded)
            .map_err(|e| Error::Authentication(format!("malformed signature: {e}")))?;

        key.verify(&self.canonical_bytes(), &signature)
            .map_err(|_| Error::Authentication("invalid signature".to_string()))
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> String {
        Value::Object(self.to_object(true)).to_string()
    }

    /// Parse the JSON wire form
    pub fn from_json(text: &str) -> Result<Self> {
        let object: BTreeMap<String, Value> = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("Invalid message format: {e}")))?;

        let mut message_type = None;
        let mut signature = None;
        let mut fields = BTreeMap::new();

        for (key, value) in object {
            let Value::String(value) = value else {
                return Err(Error::Protocol(format!(
                    "Invalid message format: '{key}' is not a string."
                )));
            };
            match key.as_str() {
                MESSAGE_TYPE_KEY => message_type = Some(value),
                SIGNATURE_KEY => signature = Some(value),
                _ => {
                    fields.insert(key, value);
                }
            }
        }

        let message_type = message_type.ok_or_else(|| {
            Error::Protocol("Invalid message format: 'messageType' missing.".to_string())
        })?;

        Ok(Envelope {
            message_type,
            fields,
            signature,
        })
    }

    /// Serialize, encrypt to `recipient` and base64-encode for a text frame
    pub fn seal(&self, recipient: &PublicKey) -> Result<String> {
        let sealed = recipient.encrypt(self.to_json().as_bytes())?;
        Ok(BASE64.encode(sealed))
    }

    /// Reverse of [`Envelope::seal`]
    pub fn open(frame: &str, identity: &Identity) -> Result<Self> {
        let sealed = BASE64
            .decode(frame.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let plaintext = identity.decrypt(&sealed)?;
        let text = String::from_utf8(plaintext)
            .map_err(|_| Error::Protocol("envelope is not valid UTF-8".to_string()))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Envelope {
        Envelope::new(message_type::CONNECTION_REQUEST).with_field(field::TARGET_USER_ID, "bob")
    }

    #[test]
    fn test_canonical_form_ignores_insertion_order() {
        let a = Envelope::new("Approval")
            .with_field("user", "bob")
            .with_field("connectionDetails", "xyz");
        let b = Envelope::new("Approval")
            .with_field("connectionDetails", "xyz")
            .with_field("user", "bob");

        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(
            String::from_utf8(a.canonical_bytes()).unwrap(),
            r#"{"connectionDetails":"xyz","messageType":"Approval","user":"bob"}"#
        );
    }

    #[test]
    fn test_signature_excluded_from_canonical_form() {
        let id = Identity::generate();
        let unsigned = request();
        let signed = request().sign(&id);

        assert_eq!(unsigned.canonical_bytes(), signed.canonical_bytes());
        assert!(signed.to_json().contains("\"signature\""));
    }

    #[test]
    fn test_sign_verify_survives_json_roundtrip() {
        let id = Identity::generate();
        let wire = request().sign(&id).to_json();

        let parsed = Envelope::from_json(&wire).unwrap();
        assert_eq!(parsed.message_type(), message_type::CONNECTION_REQUEST);
        assert_eq!(parsed.field(field::TARGET_USER_ID), Some("bob"));
        assert!(parsed.verify(id.public_key()).is_ok());
    }

    #[test]
    fn test_reordered_json_still_verifies() {
        let id = Identity::generate();
        let signed = request().sign(&id);
        let reordered = format!(
            r#"{{"signature":"{}","targetUserId":"bob","messageType":"Connection request"}}"#,
            signed.signature().unwrap()
        );

        let parsed = Envelope::from_json(&reordered).unwrap();
        assert!(parsed.verify(id.public_key()).is_ok());
    }

    #[test]
    fn test_tampered_field_fails_verification() {
        let id = Identity::generate();
        let mut parsed = Envelope::from_json(&request().sign(&id).to_json()).unwrap();
        parsed
            .fields
            .insert(field::TARGET_USER_ID.to_string(), "eve".to_string());

        assert!(matches!(
            parsed.verify(id.public_key()),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_missing_signature_fails_verification() {
        let id = Identity::generate();
        assert!(matches!(
            request().verify(id.public_key()),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_missing_message_type_rejected() {
        let err = Envelope::from_json(r#"{"targetUserId":"bob"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(m) if m.contains("'messageType' missing")));
    }

    #[test]
    fn test_non_string_field_rejected() {
        let err = Envelope::from_json(r#"{"messageType":"Register","userId":7}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_require_reports_missing_field() {
        let env = Envelope::new(message_type::REGISTER);
        assert!(matches!(env.require(field::USER_ID), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_seal_open() {
        let sender = Identity::generate();
        let recipient = Identity::generate();
        let env = request().sign(&sender);

        let frame = env.seal(recipient.public_key()).unwrap();
        assert!(!frame.contains("bob"));

        let opened = Envelope::open(&frame, &recipient).unwrap();
        assert_eq!(opened, env);
        assert!(opened.verify(sender.public_key()).is_ok());
    }

    #[test]
    fn test_open_with_wrong_identity_fails() {
        let recipient = Identity::generate();
        let other = Identity::generate();
        let frame = request().seal(recipient.public_key()).unwrap();

        assert!(matches!(
            Envelope::open(&frame, &other),
            Err(Error::Crypto(CryptoError::DecryptionFailed))
        ));
    }
}
