//! Production Environment implementation using the OS RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait.
//! Ephemeral keys drawn from it are truly random and not reproducible.

use boltlink_core::Environment;

/// Production environment using cryptographic RNG.
///
/// # Security
///
/// The RNG uses getrandom which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux, `BCryptGenRandom` on Windows). Suitable for
/// static identities and per-connection ephemeral keys.
///
/// # Panics
///
/// Panics if the OS RNG fails. A node without functioning cryptographic
/// randomness cannot run the handshake securely, and continuing would
/// compromise every ephemeral key it generates.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - node cannot operate securely");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_are_random() {
        let env = SystemEnv::new();

        let mut bytes1 = [0u8; 32];
        let mut bytes2 = [0u8; 32];

        env.random_bytes(&mut bytes1);
        env.random_bytes(&mut bytes2);

        // Extremely unlikely to be equal if random
        assert_ne!(bytes1, bytes2, "Random bytes should differ");
    }

    #[test]
    fn generated_keys_differ() {
        let env = SystemEnv::new();
        let a = env.generate_keypair().unwrap();
        let b = env.generate_keypair().unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }
}
