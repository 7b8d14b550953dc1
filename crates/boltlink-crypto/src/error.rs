//! Error types for cryptographic primitives.

use thiserror::Error;

/// Errors produced by the primitive provider.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD tag verification failed (wrong key, nonce, AD, or tampered data)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Bytes do not encode a valid compressed secp256k1 point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Bytes are not a valid secp256k1 scalar (zero or >= curve order)
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// Random source kept producing out-of-range scalars
    #[error("key generation failed after {attempts} attempts")]
    KeyGeneration {
        /// Number of candidate scalars rejected
        attempts: u32,
    },
}
