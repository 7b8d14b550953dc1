//! `ChaCha20-Poly1305` with the Noise nonce layout.
//!
//! All functions are pure. The nonce is derived from a 64-bit counter that
//! the caller owns and advances.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::error::CryptoError;

/// Poly1305 tag size (16 bytes)
pub const MAC_SIZE: usize = 16;

/// `ChaCha20-Poly1305` nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Encrypt `plaintext` under `key`, authenticating `ad`.
///
/// Returns `ciphertext || tag`, always `plaintext.len() + MAC_SIZE` bytes.
pub fn encrypt_with_ad(key: &[u8; 32], counter: u64, ad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = build_nonce(counter);

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: ad })
    else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    ciphertext
}

/// Decrypt `ciphertext || tag` under `key`, verifying `ad`.
///
/// # Errors
///
/// - `AuthenticationFailed`: tag mismatch, or input shorter than a tag
pub fn decrypt_with_ad(
    key: &[u8; 32],
    counter: u64,
    ad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < MAC_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = build_nonce(counter);

    cipher
        .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad: ad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Build a 12-byte nonce from a counter.
///
/// Structure:
/// - bytes 0-3: zero
/// - bytes 4-11: counter (little-endian)
pub fn build_nonce(counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}
