//! Runtime error types.

use std::io;

use boltlink_core::ChannelError;
use thiserror::Error;

/// Errors surfaced by [`crate::SecureStream`], [`crate::Listener`] and
/// [`crate::connect`].
#[derive(Debug, Error)]
pub enum StreamError {
    /// Socket setup failed (bind, connect, accept).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The channel rejected an operation or terminated with an error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The stream is closed, or closed before the awaited event.
    #[error("stream closed")]
    Closed,
}

impl StreamError {
    /// Returns true if the peer violated the protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Channel(err) if err.is_protocol_violation())
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(err) => err,
            StreamError::Channel(err) => err.into(),
            StreamError::Closed => Self::new(io::ErrorKind::BrokenPipe, "stream closed"),
        }
    }
}
