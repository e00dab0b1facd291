//! The post-handshake stream cipher.
//!
//! Once both sides of the handshake hold the shared secret, every byte on
//! the wire runs through AES-256-CTR. Both directions derive the same
//! 32-byte key, so the cipher construction only has to match between the
//! encoder and decoder of the two peers.

use aes::Aes256;
use ctr::{
    cipher::{KeyIvInit, StreamCipher},
    Ctr128BE,
};
use sha2::{Digest, Sha256};

type Aes256Ctr = Ctr128BE<Aes256>;

/// Derives the symmetric key from the handshake salt and the X coordinate
/// of the ECDH point product: `SHA-256(salt ∥ shared_secret)`.
pub fn derive_key(salt: &[u8], shared_secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(shared_secret);
    hasher.finalize().into()
}

/// Symmetric stream cipher applied to all bytes after the handshake.
///
/// The counter IV is the first 16 bytes of the key. Encrypting and
/// decrypting are the same keystream XOR, so one type serves both the
/// encoder and the decoder.
pub struct PacketCipher {
    inner: Aes256Ctr,
}

impl PacketCipher {
    /// Creates a cipher from the 32-byte derived key.
    pub fn new(key: &[u8; 32]) -> Self {
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&key[..16]);
        Self { inner: Aes256Ctr::new(key.into(), &iv.into()) }
    }

    /// Applies the keystream to `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}
