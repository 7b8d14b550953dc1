//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from the system random source. Production uses
//! OS entropy; the simulation harness uses a seeded generator so that
//! ephemeral keys, and therefore every byte on the wire, are reproducible.

use boltlink_crypto::{CryptoError, KeyPair};

/// Abstract environment providing randomness.
///
/// Time is deliberately absent: handshake deadlines are enforced by the
/// runtime that drives the channel, not by the state machine.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Given the same seed, simulation implementations produce the same bytes
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a fresh secp256k1 key pair.
    ///
    /// Used for the per-connection ephemeral key of both roles.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration` if the random source keeps producing invalid
    ///   scalars
    fn generate_keypair(&self) -> Result<KeyPair, CryptoError> {
        KeyPair::generate(|buffer| self.random_bytes(buffer))
    }

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
