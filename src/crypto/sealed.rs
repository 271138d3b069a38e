//! Sealed-box encryption to a long-term public key
//!
//! Each message gets a fresh ephemeral X25519 key. The ephemeral secret is
//! combined with the recipient's X25519 key, the result is run through the
//! BLAKE3 KDF, and the payload is encrypted with ChaCha20-Poly1305 using the
//! ephemeral public key as associated data.
//!
//! Layout: `ephemeral_pub (32) || nonce (12) || ciphertext || tag (16)`

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public, StaticSecret};

use super::cipher::{Cipher, NONCE_SIZE, TAG_SIZE};
use super::error::{CryptoError, CryptoResult};
use super::hash::Hash;
use super::identity::{Identity, PublicKey, KEY_HALF_SIZE};

const SEAL_CONTEXT: &str = "parley 2024 sealed-box v1";

/// Smallest possible sealed message (empty plaintext)
pub const SEAL_OVERHEAD: usize = KEY_HALF_SIZE + NONCE_SIZE + TAG_SIZE;

fn derive_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> [u8; 32] {
    let mut material = [0u8; 96];
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral);
    material[64..].copy_from_slice(recipient);
    Hash::derive_key(SEAL_CONTEXT, &material)
}

/// Encrypt `plaintext` so only the holder of `recipient`'s identity can read it
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral).to_bytes();

    let recipient_exchange = recipient.exchange_bytes();
    let shared = ephemeral.diffie_hellman(&X25519Public::from(*recipient_exchange));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let key = derive_key(shared.as_bytes(), &ephemeral_public, recipient_exchange);
    let body = Cipher::encrypt_with_aad(&key, plaintext, &ephemeral_public)?;

    let mut sealed = Vec::with_capacity(KEY_HALF_SIZE + body.len());
    sealed.extend_from_slice(&ephemeral_public);
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

/// Decrypt a message produced by [`seal`] for `identity`
pub fn open(identity: &Identity, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::DecryptionFailed);
    }

    let mut ephemeral_public = [0u8; KEY_HALF_SIZE];
    ephemeral_public.copy_from_slice(&sealed[..KEY_HALF_SIZE]);

    let secret = StaticSecret::from(*identity.exchange_secret());
    let shared = secret.diffie_hellman(&X25519Public::from(ephemeral_public));
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed);
    }

    let key = derive_key(
        shared.as_bytes(),
        &ephemeral_public,
        identity.public_key().exchange_bytes(),
    );
    Cipher::decrypt_with_aad(&key, &sealed[KEY_HALF_SIZE..], &ephemeral_public)
}
