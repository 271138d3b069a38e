//! Cryptographic primitives for parley
//!
//! This module provides all the cryptographic building blocks:
//! - `identity`: long-term keys, Ed25519 signatures, key encoding
//! - `sealed`: X25519 sealed-box encryption to a recipient's public key
//! - `cipher`: ChaCha20-Poly1305 AEAD encryption
//! - `hash`: BLAKE3 hashing and key derivation

pub mod cipher;
pub mod error;
pub mod hash;
pub mod identity;
pub mod sealed;

pub use cipher::Cipher;
pub use error::{CryptoError, CryptoResult};
pub use hash::Hash;
pub use identity::{Identity, PublicKey, SignatureBytes};
