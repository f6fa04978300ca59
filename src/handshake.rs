//! One-shot handshake establishing protocol compatibility and exchanging
//! ephemeral public keys.
//!
//! # Protocol
//!
//! ```text
//! Client                                   Server
//!   |------------ HANDSHAKE_TOKEN --------->|  AwaitingToken
//!   |<----------- server public key --------|  AwaitingPeerKey
//!   |------------ client public key ------->|
//!   |                                       |  Established
//! ```
//!
//! A server that rejects the handshake answers with [`REJECTION_TOKEN`] in
//! place of its public key and closes the connection (see
//! [`crate::channel::accept`]).
//!
//! # State Machine
//!
//! ```text
//! ┌───────────────┐  token ok   ┌─────────────────┐  key read  ┌─────────────┐
//! │ AwaitingToken │ ──────────→ │ AwaitingPeerKey │ ─────────→ │ Established │
//! └───────────────┘             └─────────────────┘            └─────────────┘
//!         │                              │
//!         └──────────────┬───────────────┘
//!                        ↓ any error
//!                  ┌──────────┐
//!                  │  Failed  │
//!                  └──────────┘
//! ```
//!
//! The client enters `AwaitingPeerKey` once its token is written.

use crate::error::SecureChannelError;
use crate::key_exchange::{KeyPair, PrivateKey, PublicKey, KEY_LEN};
use crate::secure_stream::read_full;
use crate::Result;
use rand_core::{CryptoRng, OsRng, RngCore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Identifies the protocol and its version. Compared byte for byte.
pub const HANDSHAKE_TOKEN: &[u8] = b"whispering gophers 1";

/// Sent by the server instead of its public key when the handshake fails.
pub const REJECTION_TOKEN: &[u8] = b"you shall not pass!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingToken,
    AwaitingPeerKey,
    Established,
    Failed,
}

/// Key material produced by a successful handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub private_key: PrivateKey,
    pub peer_public_key: PublicKey,
}

/// Drives one side of the handshake over a raw stream.
///
/// A `Handshake` is single-use: once it reaches `Established` or `Failed`
/// it refuses to run again.
pub struct Handshake<R = OsRng> {
    state: HandshakeState,
    rng: R,
}

impl Handshake<OsRng> {
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }
}

impl Default for Handshake<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Handshake<R>
where
    R: RngCore + CryptoRng,
{
    /// Uses `rng` to generate this side's ephemeral key pair.
    pub fn with_rng(rng: R) -> Self {
        Self {
            state: HandshakeState::AwaitingToken,
            rng,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Runs the initiating side.
    ///
    /// # Errors
    ///
    /// - [`SecureChannelError::BadHandshake`] if the server answers with the
    ///   rejection token
    /// - [`SecureChannelError::UnexpectedEndOfStream`] if the server key is cut short
    /// - transport errors while writing, unchanged
    pub async fn client<S>(&mut self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.ensure_fresh()?;
        let result = self.run_client(stream).await;
        self.finish(result)
    }

    /// Runs the responding side.
    ///
    /// Writing the rejection token on failure is left to the caller.
    ///
    /// # Errors
    ///
    /// - [`SecureChannelError::BadHandshake`] as soon as the received token diverges
    /// - [`SecureChannelError::UnexpectedEndOfStream`] if the token or the
    ///   client key is cut short
    /// - transport errors, unchanged
    pub async fn server<S>(&mut self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.ensure_fresh()?;
        let result = self.run_server(stream).await;
        self.finish(result)
    }

    async fn run_client<S>(&mut self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(HANDSHAKE_TOKEN).await?;
        stream.flush().await?;
        self.transition(HandshakeState::AwaitingPeerKey);

        let server_public_key = receive_key(stream).await?;

        let key_pair = KeyPair::generate(&mut self.rng)?;
        stream.write_all(key_pair.public_key.as_bytes()).await?;
        stream.flush().await?;

        Ok(HandshakeOutcome {
            private_key: key_pair.private_key,
            peer_public_key: server_public_key,
        })
    }

    async fn run_server<S>(&mut self, stream: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        receive_token(stream).await?;
        self.transition(HandshakeState::AwaitingPeerKey);

        let key_pair = KeyPair::generate(&mut self.rng)?;
        stream.write_all(key_pair.public_key.as_bytes()).await?;
        stream.flush().await?;

        let client_public_key = receive_key(stream).await?;

        Ok(HandshakeOutcome {
            private_key: key_pair.private_key,
            peer_public_key: client_public_key,
        })
    }

    fn ensure_fresh(&self) -> Result<()> {
        match self.state {
            HandshakeState::Established | HandshakeState::Failed => {
                Err(SecureChannelError::BadHandshake)
            }
            _ => Ok(()),
        }
    }

    fn finish(&mut self, result: Result<HandshakeOutcome>) -> Result<HandshakeOutcome> {
        match &result {
            Ok(_) => self.transition(HandshakeState::Established),
            Err(err) => {
                debug!(error = %err, from = ?self.state, "handshake failed");
                self.transition(HandshakeState::Failed);
            }
        }
        result
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = ?self.state, to = ?next, "handshake transition");
        self.state = next;
    }
}

/// Reads the protocol token, failing on the first byte that diverges.
async fn receive_token<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut received = [0u8; HANDSHAKE_TOKEN.len()];
    let mut filled = 0;
    while filled < received.len() {
        let n = stream.read(&mut received[filled..]).await?;
        if n == 0 {
            return Err(SecureChannelError::UnexpectedEndOfStream);
        }
        if received[filled..filled + n] != HANDSHAKE_TOKEN[filled..filled + n] {
            return Err(SecureChannelError::BadHandshake);
        }
        filled += n;
    }
    Ok(())
}

/// Reads one 32-byte public key.
///
/// A short read that spells out the rejection token is the server saying no.
async fn receive_key<S>(stream: &mut S) -> Result<PublicKey>
where
    S: AsyncRead + Unpin,
{
    let mut key = [0u8; KEY_LEN];
    let n = read_full(stream, &mut key).await?;
    if n == KEY_LEN {
        return Ok(PublicKey::from_bytes(key));
    }
    if &key[..n] == REJECTION_TOKEN {
        return Err(SecureChannelError::BadHandshake);
    }
    Err(SecureChannelError::UnexpectedEndOfStream)
}
