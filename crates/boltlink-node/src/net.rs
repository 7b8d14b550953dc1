//! TCP entry points.

use std::net::SocketAddr;

use boltlink_crypto::{KeyPair, PublicKey};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::{config::StreamConfig, error::StreamError, stream::SecureStream};

/// Dial `addr` and start the handshake toward `remote_static`.
///
/// Returns once the TCP connection is established; await
/// [`SecureStream::connected`] for the handshake.
///
/// # Errors
///
/// - `Io` if the connection could not be established
pub async fn connect(
    addr: impl ToSocketAddrs,
    local_static: KeyPair,
    remote_static: PublicKey,
    config: StreamConfig,
) -> Result<SecureStream, StreamError> {
    let socket = TcpStream::connect(addr).await?;
    socket.set_nodelay(true)?;
    tracing::debug!(peer = ?socket.peer_addr().ok(), "tcp connected");
    SecureStream::initiator(socket, local_static, remote_static, config)
}

/// Accepts inbound connections as the responder.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_static: KeyPair,
    config: StreamConfig,
}

impl Listener {
    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// - `Io` if the address cannot be bound
    pub async fn bind(
        addr: impl ToSocketAddrs,
        local_static: KeyPair,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        let inner = TcpListener::bind(addr).await?;
        tracing::info!(addr = ?inner.local_addr().ok(), key = %local_static.public_key(), "listening");
        Ok(Self { inner, local_static, config })
    }

    /// Bound address.
    ///
    /// # Errors
    ///
    /// - `Io` if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr, StreamError> {
        Ok(self.inner.local_addr()?)
    }

    /// Static key peers must dial.
    pub fn public_key(&self) -> PublicKey {
        self.local_static.public_key()
    }

    /// Accept the next connection.
    ///
    /// The handshake runs in the background; a peer failing it surfaces as
    /// an error event on the returned stream, not here.
    ///
    /// # Errors
    ///
    /// - `Io` if accepting failed
    pub async fn accept(&self) -> Result<(SecureStream, SocketAddr), StreamError> {
        let (socket, peer) = self.inner.accept().await?;
        socket.set_nodelay(true)?;
        tracing::debug!(%peer, "tcp accepted");
        let stream = SecureStream::responder(socket, self.local_static.clone(), self.config.clone())?;
        Ok((stream, peer))
    }
}
