//! boltlink Cryptographic Primitives
//!
//! The primitive provider for the `Noise_XK_secp256k1_ChaChaPoly_SHA256`
//! handshake and transport. Pure functions with deterministic outputs. Callers
//! provide random bytes for key generation, which keeps every higher layer
//! reproducible under test.
//!
//! # Primitives
//!
//! ```text
//! SHA-256            → transcript hash h, protocol name digest
//! HKDF-SHA256 (64B)  → (ck, temp_k) and (send_key, recv_key) splits
//! secp256k1 ECDH     → SHA256(compressed shared point)
//! ChaCha20-Poly1305  → 12-byte nonce = 0x00000000 || counter (LE)
//! ```
//!
//! # Security
//!
//! - AEAD failures surface as [`CryptoError::AuthenticationFailed`] and never
//!   yield partial plaintext
//! - Secret scalars are erased when a [`KeyPair`] is dropped
//! - HKDF output buffers are zeroized after being split

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod aead;
mod error;
mod hash;
mod keys;

pub use aead::{MAC_SIZE, NONCE_SIZE, build_nonce, decrypt_with_ad, encrypt_with_ad};
pub use error::CryptoError;
pub use hash::{hkdf, sha256, sha256_concat};
pub use keys::{
    KeyPair, PUBLIC_KEY_SIZE, PublicKey, SECRET_KEY_SIZE, ecdh, parse_public_key,
};
