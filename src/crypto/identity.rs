//! Long-term identity keys
//!
//! An identity is an Ed25519 signing key paired with an X25519 key used to
//! receive sealed messages. The public half of both travels together as a
//! single [`PublicKey`], which is what the signaling server stores per user
//! and what peers pin when a connection request arrives.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};
use super::hash::Hash;
use super::sealed;

/// Size of each half of a public key in bytes
pub const KEY_HALF_SIZE: usize = 32;

/// Size of an encoded public key in bytes (signing half || exchange half)
pub const PUBLIC_KEY_SIZE: usize = 2 * KEY_HALF_SIZE;

/// Size of a persisted identity in bytes (signing secret || exchange secret)
pub const SECRET_KEY_SIZE: usize = 2 * KEY_HALF_SIZE;

/// Size of a signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// A public identity key: Ed25519 for signatures, X25519 for encryption
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey {
    signing: [u8; KEY_HALF_SIZE],
    exchange: [u8; KEY_HALF_SIZE],
}

impl PublicKey {
    /// Create from the 64-byte wire form
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut signing = [0u8; KEY_HALF_SIZE];
        let mut exchange = [0u8; KEY_HALF_SIZE];
        signing.copy_from_slice(&bytes[..KEY_HALF_SIZE]);
        exchange.copy_from_slice(&bytes[KEY_HALF_SIZE..]);

        // Reject points that are not valid Ed25519 keys up front
        VerifyingKey::from_bytes(&signing).map_err(|_| CryptoError::InvalidPublicKey)?;

        Ok(PublicKey { signing, exchange })
    }

    /// The 64-byte wire form
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes[..KEY_HALF_SIZE].copy_from_slice(&self.signing);
        bytes[KEY_HALF_SIZE..].copy_from_slice(&self.exchange);
        bytes
    }

    /// Encode for transport inside an envelope field
    pub fn encode(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Decode a key produced by [`PublicKey::encode`]
    pub fn decode(s: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(s.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// The X25519 half, used as the recipient key for sealed messages
    pub(crate) fn exchange_bytes(&self) -> &[u8; KEY_HALF_SIZE] {
        &self.exchange
    }

    /// Short stable fingerprint for logs
    pub fn fingerprint(&self) -> String {
        Hash::fingerprint(&self.to_bytes())
    }

    /// Verify a signature against this public key
    pub fn verify(&self, message: &[u8], signature: &SignatureBytes) -> CryptoResult<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.signing).map_err(|_| CryptoError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }

    /// Encrypt a message that only the holder of this key can read
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        sealed::seal(self, plaintext)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A signature produced by an identity
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(SignatureBytes(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }

    /// Encode as base64 for the envelope `signature` field
    pub fn encode(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Decode from the envelope `signature` field
    pub fn decode(s: &str) -> CryptoResult<Self> {
        let bytes = BASE64
            .decode(s.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &hex::encode(self.0)[..16])
    }
}

/// A cryptographic identity consisting of a signing and an exchange keypair
///
/// The secret keys are zeroized when dropped. The private halves are never
/// serialized except through [`Identity::to_bytes`] for local persistence.
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    #[zeroize(skip)]
    public_key: PublicKey,
    signing_secret: [u8; KEY_HALF_SIZE],
    exchange_secret: [u8; KEY_HALF_SIZE],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let exchange_secret = StaticSecret::random_from_rng(OsRng);
        Self::from_parts(signing_key.to_bytes(), exchange_secret.to_bytes())
    }

    fn from_parts(signing_secret: [u8; KEY_HALF_SIZE], exchange_secret: [u8; KEY_HALF_SIZE]) -> Self {
        let signing = SigningKey::from_bytes(&signing_secret)
            .verifying_key()
            .to_bytes();
        let exchange = X25519Public::from(&StaticSecret::from(exchange_secret)).to_bytes();

        Identity {
            public_key: PublicKey { signing, exchange },
            signing_secret,
            exchange_secret,
        }
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The X25519 secret, for opening sealed messages
    pub(crate) fn exchange_secret(&self) -> &[u8; KEY_HALF_SIZE] {
        &self.exchange_secret
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signing_key = SigningKey::from_bytes(&self.signing_secret);
        SignatureBytes(signing_key.sign(message).to_bytes())
    }

    /// Decrypt a message sealed to this identity's public key
    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        sealed::open(self, ciphertext)
    }

    /// Export identity to bytes for local persistence
    ///
    /// WARNING: This exposes the secret keys. Handle with extreme care.
    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        let mut bytes = [0u8; SECRET_KEY_SIZE];
        bytes[..KEY_HALF_SIZE].copy_from_slice(&self.signing_secret);
        bytes[KEY_HALF_SIZE..].copy_from_slice(&self.exchange_secret);
        bytes
    }

    /// Import identity from bytes produced by [`Identity::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }

        let mut signing_secret = [0u8; KEY_HALF_SIZE];
        let mut exchange_secret = [0u8; KEY_HALF_SIZE];
        signing_secret.copy_from_slice(&bytes[..KEY_HALF_SIZE]);
        exchange_secret.copy_from_slice(&bytes[KEY_HALF_SIZE..]);

        let identity = Self::from_parts(signing_secret, exchange_secret);
        signing_secret.zeroize();
        exchange_secret.zeroize();
        Ok(identity)
    }
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Identity {
            public_key: self.public_key,
            signing_secret: self.signing_secret,
            exchange_secret: self.exchange_secret,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generation() {
        let id1 = Identity::generate();
        let id2 = Identity::generate();

        assert_ne!(id1.public_key(), id2.public_key());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"Hello, parley!";

        let signature = id.sign(message);
        assert!(id.public_key().verify(message, &signature).is_ok());
    }

    #[test]
    fn test_wrong_message_fails() {
        let id = Identity::generate();
        let signature = id.sign(b"Hello, parley!");
        assert_eq!(
            id.public_key().verify(b"Wrong message", &signature),
            Err(CryptoError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let id1 = Identity::generate();
        let id2 = Identity::generate();

        let signature = id1.sign(b"Hello, parley!");
        assert!(id2.public_key().verify(b"Hello, parley!", &signature).is_err());
    }

    #[test]
    fn test_export_import() {
        let id = Identity::generate();
        let signature = id.sign(b"Test message");

        let restored = Identity::from_bytes(&id.to_bytes()).unwrap();

        assert_eq!(id.public_key(), restored.public_key());
        assert!(restored.public_key().verify(b"Test message", &signature).is_ok());
    }

    #[test]
    fn test_import_rejects_wrong_length() {
        assert!(matches!(
            Identity::from_bytes(&[0u8; 10]),
            Err(CryptoError::InvalidKeyLength { expected: 64, actual: 10 })
        ));
    }

    #[test]
    fn test_public_key_encode_decode() {
        let id = Identity::generate();
        let encoded = id.public_key().encode();
        let restored = PublicKey::decode(&encoded).unwrap();

        assert_eq!(*id.public_key(), restored);
    }

    #[test]
    fn test_decode_garbage_key() {
        assert!(matches!(
            PublicKey::decode("not base64!!"),
            Err(CryptoError::InvalidEncoding(_))
        ));
        assert!(matches!(
            PublicKey::decode("AAAA"),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn test_signature_encode_decode() {
        let id = Identity::generate();
        let signature = id.sign(b"payload");
        let restored = SignatureBytes::decode(&signature.encode()).unwrap();
        assert_eq!(signature, restored);
    }

    #[test]
    fn test_public_key_serde() {
        let id = Identity::generate();
        let json = serde_json::to_string(id.public_key()).unwrap();
        let restored: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(*id.public_key(), restored);
    }
}
