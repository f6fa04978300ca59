//! # Secure Echo Channel
//!
//! A small point-to-point secure channel protocol over any ordered, reliable
//! byte stream, plus the echo server and dialing client built on top of it.
//!
//! ## Overview
//!
//! Two peers perform a one-shot handshake: the client announces the protocol
//! with a fixed token, then the server and the client each send a freshly
//! generated X25519 public key. Every message after that is sealed with
//! XChaCha20-Poly1305 under a key derived from the X25519 shared secret, using
//! a fresh random 24-byte nonce per message.
//!
//! ```text
//! Client                                   Server
//!   |------- "whispering gophers 1" ------->|
//!   |<------ server public key (32) --------|
//!   |------- client public key (32) ------->|
//!   |                                       |
//!   |== [len:4][nonce:24][ciphertext+tag] ==|
//! ```
//!
//! ## Features
//!
//! - **Ephemeral keys**: a new key pair per connection, zeroized on drop
//! - **Authenticated framing**: tampering is reported as [`SecureChannelError::Decryption`],
//!   truncation as [`SecureChannelError::UnexpectedEndOfStream`]
//! - **Bounded allocation**: frames larger than the agreed maximum are refused
//!   before any buffer is allocated
//! - **Generic Transport**: works with any `AsyncRead + AsyncWrite` stream
//! - **Prompt close**: closing a channel, or shutting down its writing half
//!   after a split, also ends a read still waiting on the peer
//!
//! ## Quick Example
//!
//! ```no_run
//! use secure_echo_channel::{dial, SecureStream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut channel = dial("127.0.0.1:8080").await?;
//!
//!     channel.write(b"hello world\n").await?;
//!
//!     let mut buf = [0u8; 1024];
//!     let n = channel.read(&mut buf).await?;
//!     assert_eq!(&buf[..n], b"hello world\n");
//!
//!     channel.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! - Peers are not authenticated. The handshake resists passive eavesdropping
//!   and tampering, not an active man-in-the-middle who substitutes keys.
//! - There is no rekeying within a session and no state survives a connection.

pub mod channel;
pub mod error;
pub mod handshake;
pub mod key_exchange;
pub mod secure_stream;

pub use channel::{
    accept, accept_with_rng, connect, connect_with_rng, dial, dial_with_config, echo, serve,
    serve_with_config, SecureChannel,
};
pub use error::SecureChannelError;
pub use handshake::{Handshake, HandshakeOutcome, HandshakeState, HANDSHAKE_TOKEN, REJECTION_TOKEN};
pub use key_exchange::{BoxKey, KeyPair, PrivateKey, PublicKey};
pub use secure_stream::{
    CloseHandle, SecureChannelConfig, SecureReader, SecureStream, SecureWriter, HEADER_LEN, MAX_MESSAGE_LEN,
    MESSAGE_OVERHEAD, NONCE_LEN, TAG_LEN,
};

/// Result type for secure channel operations
pub type Result<T> = std::result::Result<T, SecureChannelError>;
