//! Ephemeral X25519 key pairs and the box key both peers derive from them.
//!
//! Each side of a connection generates a [`KeyPair`], sends the public half
//! during the handshake and keeps the private half. Combining the own private
//! key with the peer's public key yields the same X25519 shared secret on both
//! ends, which is hashed into a [`BoxKey`]:
//!
//! ```text
//! box_key = SHA3-256(x25519(own_private, peer_public) || "whispering gophers box v1")
//! ```
//!
//! # Security Considerations
//!
//! - Key pairs live for one connection only and are never persisted
//! - Private keys and derived box keys are zeroized on drop
//! - The peer public key is untrusted input; it is only ever used as a
//!   Diffie-Hellman parameter and is not authenticated

use crate::error::SecureChannelError;
use crate::Result;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand_core::{CryptoRng, RngCore};
use sha3::{Digest, Sha3_256};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// Size of an X25519 public or private key.
pub const KEY_LEN: usize = 32;

const BOX_KEY_CONTEXT: &[u8] = b"whispering gophers box v1";

/// An X25519 public key as sent on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// An X25519 private key. Zeroized on drop.
pub struct PrivateKey(x25519_dalek::StaticSecret);

impl PrivateKey {
    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0).to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A freshly generated X25519 key pair.
///
/// Exclusively owned by the connection that generated it.
#[derive(Debug)]
pub struct KeyPair {
    /// Sent to the peer during the handshake
    pub public_key: PublicKey,
    /// Kept local; combined with the peer's public key to derive the box key
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generates a new key pair from a cryptographically secure RNG.
    ///
    /// # Errors
    ///
    /// Returns [`SecureChannelError::Randomness`] if the RNG fails. The
    /// failure is not retried.
    ///
    /// # Example
    ///
    /// ```
    /// use secure_echo_channel::KeyPair;
    /// use rand_core::OsRng;
    ///
    /// let key_pair = KeyPair::generate(&mut OsRng).unwrap();
    /// assert_eq!(key_pair.private_key.public_key(), key_pair.public_key);
    /// ```
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        rng.try_fill_bytes(&mut seed[..])
            .map_err(|_| SecureChannelError::Randomness)?;

        let private_key = PrivateKey(x25519_dalek::StaticSecret::from(*seed));
        Ok(Self {
            public_key: private_key.public_key(),
            private_key,
        })
    }
}

/// Symmetric sealing key shared by both ends of a connection.
///
/// Seal and open are XChaCha20-Poly1305 with a caller-provided 24-byte nonce
/// and no associated data. The output of [`BoxKey::seal`] is the ciphertext
/// followed by the 16-byte tag.
pub struct BoxKey {
    cipher: XChaCha20Poly1305,
}

impl BoxKey {
    /// Derives the box key for `(own private key, peer public key)`.
    ///
    /// Both peers arrive at the same key from their own halves.
    pub fn derive(private_key: &PrivateKey, peer_public_key: &PublicKey) -> Self {
        let peer = x25519_dalek::PublicKey::from(peer_public_key.0);
        let shared = private_key.0.diffie_hellman(&peer);

        let mut hasher = Sha3_256::new();
        hasher.update(shared.as_bytes());
        hasher.update(BOX_KEY_CONTEXT);
        let mut key = [0u8; 32];
        key.copy_from_slice(&hasher.finalize());

        let cipher = XChaCha20Poly1305::new(&key.into());
        key.zeroize();
        Self { cipher }
    }

    /// Encrypts and authenticates `plaintext`, returning `ciphertext || tag`.
    pub fn seal(&self, nonce: &[u8; 24], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| SecureChannelError::Encryption)
    }

    /// Verifies the tag and decrypts `ciphertext || tag`.
    ///
    /// No plaintext is produced unless the tag verifies.
    pub fn open(&self, nonce: &[u8; 24], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| SecureChannelError::Decryption)
    }
}

impl fmt::Debug for BoxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxKey(..)")
    }
}
