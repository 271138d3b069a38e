//! BLAKE3 hashing and key derivation

/// Size of a hash output in bytes
pub const HASH_SIZE: usize = 32;

/// A hash output
pub type HashOutput = [u8; HASH_SIZE];

/// Hashing and key derivation operations
pub struct Hash;

impl Hash {
    /// Compute hash of data
    pub fn hash(data: &[u8]) -> HashOutput {
        blake3::hash(data).into()
    }

    /// Derive a 32-byte key from arbitrary key material
    ///
    /// The context must be a hardcoded, globally unique string naming the
    /// purpose of the derived key.
    pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
        blake3::derive_key(context, material)
    }

    /// Short hex fingerprint of some data, for log lines
    pub fn fingerprint(data: &[u8]) -> String {
        hex::encode(&Self::hash(data)[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"Hello, parley!";
        assert_eq!(Hash::hash(data), Hash::hash(data));
        assert_ne!(Hash::hash(b"input1"), Hash::hash(b"input2"));
    }

    #[test]
    fn test_key_derivation() {
        let material = [0u8; 32];

        let key1 = Hash::derive_key("parley test purpose-1", &material);
        let key2 = Hash::derive_key("parley test purpose-2", &material);

        // Different contexts produce different keys
        assert_ne!(key1, key2);
        assert_eq!(key1, Hash::derive_key("parley test purpose-1", &material));
    }

    #[test]
    fn test_fingerprint_is_short_hex() {
        let fp = Hash::fingerprint(b"some key");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
