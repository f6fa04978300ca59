//! Client and server drivers on top of the handshake and the secure framing.
//!
//! [`dial`] connects over TCP and returns a [`SecureChannel`]; [`serve`]
//! accepts TCP connections and runs the echo loop for each of them on its own
//! task. [`connect`] and [`accept`] do the same over an already established
//! transport of any type.

use crate::error::SecureChannelError;
use crate::handshake::{Handshake, REJECTION_TOKEN};
use crate::key_exchange::{PrivateKey, PublicKey};
use crate::secure_stream::{
    CloseHandle, SecureChannelConfig, SecureReader, SecureStream, SecureWriter,
};
use crate::Result;
use rand_core::{CryptoRng, OsRng, RngCore};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// An established secure channel over transport `T`.
///
/// The transport is split into a [`SecureReader`] and a [`SecureWriter`]
/// bound to the same key material and the same [`CloseHandle`]. Use
/// [`SecureChannel::split`] to drive reads and writes from different tasks;
/// shutting down the writer then also ends a read pending on the reader.
/// Message nonces are drawn from `R`.
///
/// # Example
///
/// ```no_run
/// use secure_echo_channel::{dial, SecureStream};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut channel = dial("127.0.0.1:8080").await?;
/// channel.write(b"Hello").await?;
///
/// let mut buf = [0u8; 64];
/// let n = channel.read(&mut buf).await?;
/// channel.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct SecureChannel<T, R = OsRng> {
    reader: SecureReader<ReadHalf<T>>,
    writer: SecureWriter<WriteHalf<T>, R>,
}

impl<T> SecureChannel<T, OsRng>
where
    T: AsyncRead + AsyncWrite,
{
    /// Wraps `transport` with keys from a completed handshake.
    pub fn new(
        transport: T,
        private_key: &PrivateKey,
        peer_public_key: &PublicKey,
        config: &SecureChannelConfig,
    ) -> Self {
        Self::with_rng(transport, private_key, peer_public_key, config, OsRng)
    }
}

impl<T, R> SecureChannel<T, R>
where
    T: AsyncRead + AsyncWrite,
    R: RngCore + CryptoRng,
{
    /// Like [`SecureChannel::new`], drawing message nonces from `rng`.
    pub fn with_rng(
        transport: T,
        private_key: &PrivateKey,
        peer_public_key: &PublicKey,
        config: &SecureChannelConfig,
        rng: R,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let close = CloseHandle::new();
        Self {
            reader: SecureReader::new(read_half, private_key, peer_public_key)
                .with_config(config)
                .with_close_handle(close.clone()),
            writer: SecureWriter::new(write_half, private_key, peer_public_key)
                .with_config(config)
                .with_rng(rng)
                .with_close_handle(close),
        }
    }

    /// Separates the reading and writing halves.
    ///
    /// Each half may be used by one task at a time. Both keep sharing the
    /// channel's [`CloseHandle`].
    pub fn split(self) -> (SecureReader<ReadHalf<T>>, SecureWriter<WriteHalf<T>, R>) {
        (self.reader, self.writer)
    }

    pub fn close_handle(&self) -> &CloseHandle {
        self.writer.close_handle()
    }
}

#[async_trait::async_trait]
impl<T, R> SecureStream for SecureChannel<T, R>
where
    T: AsyncRead + AsyncWrite + Send,
    R: RngCore + CryptoRng + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.writer.write(data).await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}

/// Performs the client handshake over `transport` and wraps it.
///
/// On failure the transport is shut down and [`SecureChannelError::BadHandshake`]
/// is returned whatever the cause; the cause is logged.
pub async fn connect<T>(transport: T, config: &SecureChannelConfig) -> Result<SecureChannel<T>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    connect_with_rng(transport, config, OsRng).await
}

/// Like [`connect`], using `rng` for the key pair and every message nonce.
pub async fn connect_with_rng<T, R>(
    mut transport: T,
    config: &SecureChannelConfig,
    mut rng: R,
) -> Result<SecureChannel<T, R>>
where
    T: AsyncRead + AsyncWrite + Unpin,
    R: RngCore + CryptoRng,
{
    let outcome = {
        let mut handshake = Handshake::with_rng(&mut rng);
        handshake.client(&mut transport).await
    };
    match outcome {
        Ok(outcome) => Ok(SecureChannel::with_rng(
            transport,
            &outcome.private_key,
            &outcome.peer_public_key,
            config,
            rng,
        )),
        Err(err) => {
            warn!(error = %err, "client handshake failed");
            if let Err(shutdown_err) = transport.shutdown().await {
                debug!(error = %shutdown_err, "shutdown after failed handshake");
            }
            Err(SecureChannelError::BadHandshake)
        }
    }
}

/// Performs the server handshake over `transport` and wraps it.
///
/// On failure the rejection token is written back, the transport is shut
/// down and the handshake error is returned.
pub async fn accept<T>(transport: T, config: &SecureChannelConfig) -> Result<SecureChannel<T>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    accept_with_rng(transport, config, OsRng).await
}

/// Like [`accept`], using `rng` for the key pair and every message nonce.
pub async fn accept_with_rng<T, R>(
    mut transport: T,
    config: &SecureChannelConfig,
    mut rng: R,
) -> Result<SecureChannel<T, R>>
where
    T: AsyncRead + AsyncWrite + Unpin,
    R: RngCore + CryptoRng,
{
    let outcome = {
        let mut handshake = Handshake::with_rng(&mut rng);
        handshake.server(&mut transport).await
    };
    match outcome {
        Ok(outcome) => Ok(SecureChannel::with_rng(
            transport,
            &outcome.private_key,
            &outcome.peer_public_key,
            config,
            rng,
        )),
        Err(err) => {
            if let Err(write_err) = transport.write_all(REJECTION_TOKEN).await {
                debug!(error = %write_err, "could not send rejection");
            }
            if let Err(shutdown_err) = transport.shutdown().await {
                debug!(error = %shutdown_err, "shutdown after rejected handshake");
            }
            Err(err)
        }
    }
}

/// Connects to `addr` over TCP and performs the client handshake.
pub async fn dial<A: ToSocketAddrs>(addr: A) -> Result<SecureChannel<TcpStream>> {
    dial_with_config(addr, &SecureChannelConfig::default()).await
}

pub async fn dial_with_config<A: ToSocketAddrs>(
    addr: A,
    config: &SecureChannelConfig,
) -> Result<SecureChannel<TcpStream>> {
    let stream = TcpStream::connect(addr).await?;
    debug!(peer = ?stream.peer_addr().ok(), "connected");
    connect(stream, config).await
}

/// Runs the secure echo server on `listener`.
///
/// Each accepted connection is served on its own task; a failing connection
/// only ends itself. Returns only when accepting fails.
pub async fn serve(listener: TcpListener) -> Result<()> {
    serve_with_config(listener, SecureChannelConfig::default()).await
}

pub async fn serve_with_config(listener: TcpListener, config: SecureChannelConfig) -> Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        info!(peer = %addr, "accepted connection");

        let config = config.clone();
        tokio::spawn(async move {
            match echo(socket, &config).await {
                Ok(()) => info!(peer = %addr, "connection closed"),
                Err(err) => warn!(peer = %addr, error = %err, "connection terminated"),
            }
        });
    }
}

/// Server side of one connection: handshake, then send every received
/// message straight back until either direction fails or the peer hangs up.
pub async fn echo<T>(transport: T, config: &SecureChannelConfig) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut channel = accept(transport, config).await?;
    let mut buf = Zeroizing::new(vec![0u8; config.message_limit()]);

    let result = loop {
        let n = match channel.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) => break Err(err),
        };
        if let Err(err) = channel.write(&buf[..n]).await {
            break Err(err);
        }
    };

    if let Err(err) = channel.close().await {
        debug!(error = %err, "close after echo loop");
    }
    result
}
