use crate::error::SecureChannelError;
use crate::key_exchange::{BoxKey, PrivateKey, PublicKey};
use crate::Result;
use rand_core::{CryptoRng, OsRng, RngCore};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::debug;
use zeroize::Zeroizing;

/// Size of the big-endian `u32` length prefix of every frame.
pub const HEADER_LEN: usize = 4;

/// XChaCha20-Poly1305 nonce size.
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag size.
pub const TAG_LEN: usize = 16;

/// Wire bytes added to every non-empty message.
pub const MESSAGE_OVERHEAD: usize = HEADER_LEN + NONCE_LEN + TAG_LEN;

/// Largest plaintext accepted in a single message (32 KiB).
pub const MAX_MESSAGE_LEN: usize = 32 * 1024;

/// Configuration parameters for secure channel connections.
///
/// Both peers must agree on `max_message_len`: a reader refuses frames that a
/// writer with a larger limit would produce.
///
/// # Example
///
/// ```
/// use secure_echo_channel::SecureChannelConfig;
///
/// let config = SecureChannelConfig {
///     max_message_len: 4096,
/// };
/// assert_eq!(config.message_limit(), 4096);
/// ```
#[derive(Clone, Debug)]
pub struct SecureChannelConfig {
    /// Maximum plaintext size per message in bytes.
    /// Values above [`MAX_MESSAGE_LEN`] are clamped to it.
    /// Default: [`MAX_MESSAGE_LEN`]
    pub max_message_len: usize,
}

impl Default for SecureChannelConfig {
    fn default() -> Self {
        Self {
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

impl SecureChannelConfig {
    /// The effective per-message plaintext limit.
    pub fn message_limit(&self) -> usize {
        self.max_message_len.min(MAX_MESSAGE_LEN)
    }
}

/// Trait defining the interface for an established secure channel.
///
/// Reads return decrypted application bytes, writes send one sealed message
/// per call, and close tears down the underlying transport.
#[async_trait::async_trait]
pub trait SecureStream: Send {
    /// Reads decrypted bytes of the next message into `buf`.
    ///
    /// Returns `Ok(0)` on clean end-of-stream between messages. Bytes of a
    /// message that do not fit into `buf` are returned by the following calls.
    ///
    /// # Errors
    ///
    /// - [`SecureChannelError::UnexpectedEndOfStream`] on a truncated frame
    /// - [`SecureChannelError::Decryption`] if the frame fails authentication
    /// - [`SecureChannelError::InvalidFrame`] on an out-of-bounds length header
    /// - [`SecureChannelError::Closed`] once the channel has been closed
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Seals `data` as a single message and sends it.
    ///
    /// Empty writes are a no-op and return `Ok(0)`.
    ///
    /// # Errors
    ///
    /// - [`SecureChannelError::MessageTooLarge`] before anything is sent
    /// - [`SecureChannelError::Closed`] once the channel has been closed
    /// - transport errors, unchanged
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Closes the channel in both directions.
    ///
    /// Shuts down the underlying transport and wakes any read or write still
    /// pending on a half obtained from the same channel; those, and every
    /// later call, fail with [`SecureChannelError::Closed`].
    async fn close(&mut self) -> Result<()>;
}

/// Close signal shared by the reading and writing half of one channel.
///
/// Closing is sticky: once [`CloseHandle::close`] has been called every clone
/// observes it, and operations racing on a transport are abandoned.
#[derive(Clone, Debug)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the handle has been closed.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
pub(crate) async fn read_full<S>(stream: &mut S, buf: &mut [u8]) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Seals whole messages onto an async byte stream.
///
/// Every call to [`SecureWriter::write`] produces exactly one frame:
///
/// ```text
/// +-----------------+-------------+---------------------------+
/// | LENGTH (4B BE)  | NONCE (24B) | CIPHERTEXT + TAG (N + 16) |
/// +-----------------+-------------+---------------------------+
/// ```
///
/// where `LENGTH` covers the nonce and ciphertext. The nonce is drawn from
/// `R` for every message.
pub struct SecureWriter<W, R = OsRng> {
    inner: W,
    key: BoxKey,
    rng: R,
    max_message_len: usize,
    close: CloseHandle,
}

impl<W> SecureWriter<W, OsRng>
where
    W: AsyncWrite + Unpin,
{
    /// Creates a writer sealing messages for the holder of `peer_public_key`.
    pub fn new(inner: W, private_key: &PrivateKey, peer_public_key: &PublicKey) -> Self {
        Self {
            inner,
            key: BoxKey::derive(private_key, peer_public_key),
            rng: OsRng,
            max_message_len: MAX_MESSAGE_LEN,
            close: CloseHandle::new(),
        }
    }
}

impl<W, R> SecureWriter<W, R>
where
    W: AsyncWrite + Unpin,
    R: RngCore + CryptoRng,
{
    pub fn with_config(mut self, config: &SecureChannelConfig) -> Self {
        self.max_message_len = config.message_limit();
        self
    }

    /// Replaces the nonce source.
    pub fn with_rng<R2: RngCore + CryptoRng>(self, rng: R2) -> SecureWriter<W, R2> {
        SecureWriter {
            inner: self.inner,
            key: self.key,
            rng,
            max_message_len: self.max_message_len,
            close: self.close,
        }
    }

    /// Ties this writer to `close`, typically shared with a [`SecureReader`].
    pub fn with_close_handle(mut self, close: CloseHandle) -> Self {
        self.close = close;
        self
    }

    pub fn close_handle(&self) -> &CloseHandle {
        &self.close
    }

    /// Seals `plaintext` and writes it as one frame.
    ///
    /// Returns the number of plaintext bytes written, which is always the
    /// full length on success. A transport failure part-way through a frame
    /// is returned as is; the frame is not resumed.
    ///
    /// # Errors
    ///
    /// Returns [`SecureChannelError::MessageTooLarge`] without touching the
    /// transport if `plaintext` exceeds the configured limit, and
    /// [`SecureChannelError::Closed`] once the close handle has fired.
    pub async fn write(&mut self, plaintext: &[u8]) -> Result<usize> {
        if self.close.is_closed() {
            return Err(SecureChannelError::Closed);
        }
        if plaintext.len() > self.max_message_len {
            return Err(SecureChannelError::MessageTooLarge {
                len: plaintext.len(),
                max: self.max_message_len,
            });
        }
        if plaintext.is_empty() {
            return Ok(0);
        }

        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| SecureChannelError::Randomness)?;

        let ciphertext = self.key.seal(&nonce, plaintext)?;
        let body_len = NONCE_LEN + ciphertext.len();

        let mut frame = Vec::with_capacity(HEADER_LEN + body_len);
        frame.extend_from_slice(&(body_len as u32).to_be_bytes());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&ciphertext);

        let close = self.close.clone();
        let inner = &mut self.inner;
        tokio::select! {
            biased;
            _ = close.closed() => return Err(SecureChannelError::Closed),
            sent = async {
                inner.write_all(&frame).await?;
                inner.flush().await
            } => sent?,
        }

        debug!(plaintext_len = plaintext.len(), frame_len = frame.len(), "sent frame");
        Ok(plaintext.len())
    }

    /// Fires the close handle, then shuts down the write side of the
    /// underlying transport.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.close.close();
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Opens whole messages from an async byte stream written by a [`SecureWriter`].
///
/// The length header is bounds-checked before the body is allocated; the
/// body is authenticated before any plaintext is handed out.
pub struct SecureReader<Rd> {
    inner: Rd,
    key: BoxKey,
    max_message_len: usize,
    pending: Zeroizing<Vec<u8>>,
    pending_pos: usize,
    close: CloseHandle,
}

impl<Rd> SecureReader<Rd>
where
    Rd: AsyncRead + Unpin,
{
    /// Creates a reader opening messages sealed by the holder of `peer_public_key`.
    pub fn new(inner: Rd, private_key: &PrivateKey, peer_public_key: &PublicKey) -> Self {
        Self {
            inner,
            key: BoxKey::derive(private_key, peer_public_key),
            max_message_len: MAX_MESSAGE_LEN,
            pending: Zeroizing::new(Vec::new()),
            pending_pos: 0,
            close: CloseHandle::new(),
        }
    }

    pub fn with_config(mut self, config: &SecureChannelConfig) -> Self {
        self.max_message_len = config.message_limit();
        self
    }

    /// Ties this reader to `close`, typically shared with a [`SecureWriter`].
    pub fn with_close_handle(mut self, close: CloseHandle) -> Self {
        self.close = close;
        self
    }

    pub fn close_handle(&self) -> &CloseHandle {
        &self.close
    }

    /// Reads, authenticates and decrypts the next frame.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly before a new header.
    /// Any bytes still buffered by [`SecureReader::read`] are not returned.
    /// A read pending when the close handle fires returns
    /// [`SecureChannelError::Closed`] and drops the partial frame.
    pub async fn read_message(&mut self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        if self.close.is_closed() {
            return Err(SecureChannelError::Closed);
        }

        let close = self.close.clone();
        tokio::select! {
            biased;
            _ = close.closed() => Err(SecureChannelError::Closed),
            message = self.read_frame() => message,
        }
    }

    async fn read_frame(&mut self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let mut header = [0u8; HEADER_LEN];
        match read_full(&mut self.inner, &mut header).await? {
            0 => return Ok(None),
            n if n < HEADER_LEN => return Err(SecureChannelError::UnexpectedEndOfStream),
            _ => {}
        }

        let body_len = u32::from_be_bytes(header) as usize;
        let min_body = NONCE_LEN + TAG_LEN;
        let max_body = self.max_message_len + NONCE_LEN + TAG_LEN;
        if body_len < min_body || body_len > max_body {
            return Err(SecureChannelError::InvalidFrame(format!(
                "frame length {} outside {}..={}",
                body_len, min_body, max_body
            )));
        }

        let mut body = vec![0u8; body_len];
        if read_full(&mut self.inner, &mut body).await? < body_len {
            return Err(SecureChannelError::UnexpectedEndOfStream);
        }

        let (nonce, ciphertext) = body.split_at(NONCE_LEN);
        let nonce = <[u8; NONCE_LEN]>::try_from(nonce)
            .map_err(|_| SecureChannelError::InvalidFrame("short nonce".to_string()))?;
        let plaintext = self.key.open(&nonce, ciphertext)?;

        debug!(plaintext_len = plaintext.len(), frame_len = HEADER_LEN + body_len, "received frame");
        Ok(Some(plaintext))
    }

    /// Copies decrypted bytes into `buf`, decoding a new frame only when the
    /// previous message has been fully handed out.
    ///
    /// Returns `Ok(0)` on clean end-of-stream or when `buf` is empty, and
    /// [`SecureChannelError::Closed`] after the close handle has fired, even
    /// if part of a message is still buffered.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.close.is_closed() {
            return Err(SecureChannelError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending_pos >= self.pending.len() {
            loop {
                match self.read_message().await? {
                    None => return Ok(0),
                    // A peer may frame an empty message; it carries nothing to hand out.
                    Some(message) if message.is_empty() => continue,
                    Some(message) => {
                        self.pending = message;
                        self.pending_pos = 0;
                        break;
                    }
                }
            }
        }

        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }

    pub fn get_ref(&self) -> &Rd {
        &self.inner
    }

    pub fn into_inner(self) -> Rd {
        self.inner
    }
}
