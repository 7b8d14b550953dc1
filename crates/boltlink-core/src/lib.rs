//! boltlink protocol core.
//!
//! Sans-IO implementation of an authenticated, encrypted point-to-point
//! channel: a three-act Noise XK handshake followed by a length-prefixed
//! transport with periodic key rotation.
//!
//! # Architecture
//!
//! Nothing in this crate performs I/O. A driver feeds received bytes in and
//! executes the returned [`ChannelAction`]s. The same state machine runs
//! under the deterministic simulation harness and the tokio runtime.
//!
//! ```text
//! ┌───────────────┐  bytes   ┌───────────────┐  actions  ┌────────────┐
//! │  transport    │─────────>│ SecureChannel │──────────>│   driver   │
//! └───────────────┘          └───────────────┘           └────────────┘
//!                                    │
//!                                    ↓
//!                            ┌───────────────┐
//!                            │HandshakeEngine│──> TransportCipher
//!                            └───────────────┘
//! ```
//!
//! # Components
//!
//! - [`HandshakeEngine`]: act production and verification, key derivation
//! - [`TransportCipher`]: per-direction nonces and key rotation
//! - [`SecureChannel`]: buffering, framing, backpressure and lifecycle
//! - [`Environment`]: randomness for ephemeral keys

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod cipher;
pub mod env;
pub mod error;
pub mod handshake;

pub use channel::{
    ChannelAction, ChannelConfig, DEFAULT_INBOX_HIGH_WATER, HandshakeState, ReadState, SecureChannel,
};
pub use cipher::{ENCRYPTED_LENGTH_SIZE, KEY_ROTATION_INTERVAL, MAX_MESSAGE_SIZE, TransportCipher};
pub use env::Environment;
pub use error::{Act, ChannelError};
pub use handshake::{
    ACT_ONE_SIZE, ACT_THREE_SIZE, ACT_TWO_SIZE, HandshakeEngine, PROLOGUE, PROTOCOL_NAME, Role,
};
