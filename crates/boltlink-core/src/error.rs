//! Error types for the boltlink protocol core.
//!
//! A single taxonomy covers the handshake engine, the transport cipher and
//! the channel state machine. Every variant except the caller-misuse ones
//! (`NotReady`, `MessageTooLarge`, `Closed`) is fatal to the connection:
//! the channel terminates, closes the transport and reports the error once.
//!
//! We avoid using `std::io::Error` for protocol logic to keep failures typed
//! and comparable in tests.

use std::{fmt, io, time::Duration};

use boltlink_crypto::CryptoError;
use thiserror::Error;

/// One of the three handshake messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Act {
    /// Initiator → responder, ephemeral key
    One,
    /// Responder → initiator, ephemeral key
    Two,
    /// Initiator → responder, encrypted static key
    Three,
}

impl fmt::Display for Act {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::One => f.write_str("act one"),
            Self::Two => f.write_str("act two"),
            Self::Three => f.write_str("act three"),
        }
    }
}

/// Errors raised by the handshake engine and the secure channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// An act did not have its fixed wire size
    #[error("{act} length mismatch: expected {expected} bytes, got {actual}")]
    HandshakeLengthMismatch {
        /// Act being parsed
        act: Act,
        /// Fixed size of the act
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// An act carried a non-zero version byte
    #[error("{act} unsupported version: {version}")]
    UnsupportedVersion {
        /// Act being parsed
        act: Act,
        /// Version byte received
        version: u8,
    },

    /// AEAD tag verification failed, in the handshake or on a packet
    #[error("authentication failed: {context}")]
    AuthenticationFailed {
        /// Which ciphertext failed to verify
        context: &'static str,
    },

    /// An act carried a malformed secp256k1 point
    #[error("{act} invalid public key")]
    InvalidPublicKey {
        /// Act being parsed
        act: Act,
    },

    /// Operation attempted in a state that does not permit it
    #[error("protocol out of order: cannot {operation} in {state}")]
    ProtocolOutOfOrder {
        /// Operation that was attempted
        operation: &'static str,
        /// State label when it was attempted
        state: &'static str,
    },

    /// Underlying transport failed or closed mid-handshake
    #[error("transport error: {0}")]
    Transport(String),

    /// Handshake did not complete within the runtime's deadline
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Ephemeral key generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(CryptoError),

    /// `write` called before the handshake completed
    #[error("channel not ready: handshake incomplete")]
    NotReady,

    /// Plaintext exceeds the 16-bit length prefix
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Size of the rejected plaintext
        size: usize,
        /// Largest encodable plaintext
        max: usize,
    },

    /// Channel already terminated or ended
    #[error("channel closed")]
    Closed,
}

impl ChannelError {
    /// Returns true if the peer sent data violating the protocol.
    ///
    /// These indicate a broken or malicious peer, never a local or network
    /// condition.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::HandshakeLengthMismatch { .. }
                | Self::UnsupportedVersion { .. }
                | Self::AuthenticationFailed { .. }
                | Self::InvalidPublicKey { .. }
                | Self::ProtocolOutOfOrder { .. }
        )
    }
}

/// Convert `ChannelError` to `io::Error` for compatibility with async I/O
/// APIs.
///
/// This is only for boundary conversion - internally we use `ChannelError`.
impl From<ChannelError> for io::Error {
    fn from(err: ChannelError) -> Self {
        let kind = match &err {
            ChannelError::HandshakeTimeout { .. } => io::ErrorKind::TimedOut,
            ChannelError::HandshakeLengthMismatch { .. }
            | ChannelError::UnsupportedVersion { .. }
            | ChannelError::AuthenticationFailed { .. }
            | ChannelError::InvalidPublicKey { .. }
            | ChannelError::ProtocolOutOfOrder { .. } => io::ErrorKind::InvalidData,
            ChannelError::MessageTooLarge { .. } => io::ErrorKind::InvalidInput,
            ChannelError::NotReady => io::ErrorKind::NotConnected,
            ChannelError::Closed => io::ErrorKind::BrokenPipe,
            ChannelError::Transport(_) | ChannelError::KeyGeneration(_) => io::ErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}
