use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecureChannelError {
    /// Token mismatch, rejection received, or any failure while dialing.
    #[error("bad client/server handshake")]
    BadHandshake,

    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    /// Tag verification failed. Tampering or a key mismatch, never truncation.
    #[error("decryption error")]
    Decryption,

    /// Sealing failed. Not expected with valid 32-byte keys.
    #[error("encryption error")]
    Encryption,

    #[error("message too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("randomness source failed")]
    Randomness,

    /// The channel was closed locally; pending and later calls fail with this.
    #[error("channel closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for SecureChannelError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => SecureChannelError::UnexpectedEndOfStream,
            _ => SecureChannelError::Io(err),
        }
    }
}
