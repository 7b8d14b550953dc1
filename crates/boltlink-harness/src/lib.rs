//! Deterministic simulation harness for boltlink channel testing.
//!
//! Seeded implementations of the [`boltlink_core::Environment`] trait and an
//! in-memory link that drives two [`boltlink_core::SecureChannel`]s against
//! each other. Every run is reproducible from its seed: ephemeral keys, chunk
//! boundaries and therefore every byte on the wire.
//!
//! # Fault Injection
//!
//! [`SimLink`] can fragment deliveries into arbitrary chunks and corrupt
//! bytes in flight. Tests assert on the [`SideLog`] each application
//! observed rather than on internal channel state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_env;
pub mod sim_link;

pub use sim_env::SimEnv;
pub use sim_link::{Side, SideLog, SimLink};
