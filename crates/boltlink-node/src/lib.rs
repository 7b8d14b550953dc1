//! boltlink node runtime.
//!
//! Production glue between the sans-IO [`boltlink_core::SecureChannel`] and
//! tokio. Owns sockets, timers and the OS RNG; all protocol decisions stay
//! in the core.
//!
//! # Components
//!
//! - [`SecureStream`]: runs one channel over any async byte stream
//! - [`connect`] / [`Listener`]: TCP entry points
//! - [`SystemEnv`]: OS randomness for ephemeral keys
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(peer: boltlink_crypto::PublicKey) -> Result<(), boltlink_node::StreamError> {
//! use boltlink_node::{StreamConfig, SystemEnv, connect};
//! use boltlink_core::Environment;
//!
//! let identity = SystemEnv::new().generate_keypair().map_err(boltlink_core::ChannelError::KeyGeneration)?;
//! let mut stream = connect("127.0.0.1:9735", identity, peer, StreamConfig::default()).await?;
//! stream.connected().await?;
//! stream.write(&b"hello"[..])?;
//! let reply = stream.recv().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod net;
mod stream;
mod system_env;

pub use config::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_READ_BUFFER_SIZE,
    DEFAULT_WRITE_HIGH_WATER, StreamConfig,
};
pub use error::StreamError;
pub use net::{Listener, connect};
pub use stream::{SecureStream, StreamEvent};
pub use system_env::SystemEnv;
