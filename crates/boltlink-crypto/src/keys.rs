//! secp256k1 key pairs and ECDH.

use std::fmt;

use secp256k1::{Secp256k1, SecretKey, ecdh::SharedSecret};
pub use secp256k1::PublicKey;

use crate::error::CryptoError;

/// Size of a compressed secp256k1 public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Size of a secp256k1 secret scalar.
pub const SECRET_KEY_SIZE: usize = 32;

/// Candidate scalars drawn before giving up on a broken random source.
const MAX_GENERATION_ATTEMPTS: u32 = 16;

/// A secp256k1 private scalar with its public point.
///
/// Used for both long-lived static identities and per-connection ephemeral
/// keys. The secret is erased when the pair is dropped.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Build a key pair from a 32-byte secret scalar.
    ///
    /// # Errors
    ///
    /// - `InvalidSecretKey` if the scalar is zero or not below the curve order
    pub fn from_secret_bytes(bytes: &[u8; SECRET_KEY_SIZE]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret);
        Ok(Self { secret, public })
    }

    /// Generate a key pair from caller-provided randomness.
    ///
    /// `fill` is asked for 32 fresh bytes per attempt. Production callers
    /// pass an OS RNG; tests pass a seeded generator for reproducibility.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration` if every candidate scalar was out of range
    pub fn generate<F>(mut fill: F) -> Result<Self, CryptoError>
    where
        F: FnMut(&mut [u8]),
    {
        let mut candidate = [0u8; SECRET_KEY_SIZE];
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            fill(&mut candidate);
            if let Ok(pair) = Self::from_secret_bytes(&candidate) {
                candidate.fill(0);
                return Ok(pair);
            }
        }
        candidate.fill(0);
        Err(CryptoError::KeyGeneration { attempts: MAX_GENERATION_ATTEMPTS })
    }

    /// The public point.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// The compressed 33-byte encoding of the public point.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.serialize()
    }

    /// The raw secret scalar.
    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.secret.secret_bytes()
    }

    /// ECDH between this key's secret and `remote`.
    pub fn ecdh(&self, remote: &PublicKey) -> [u8; 32] {
        ecdh(remote, &self.secret)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

/// Parse a 33-byte compressed public key.
///
/// # Errors
///
/// - `InvalidPublicKey` for uncompressed prefixes or points off the curve
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    if bytes.len() != PUBLIC_KEY_SIZE {
        return Err(CryptoError::InvalidPublicKey);
    }
    PublicKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

/// secp256k1 ECDH: SHA-256 of the compressed point `secret * public`.
pub fn ecdh(public: &PublicKey, secret: &SecretKey) -> [u8; 32] {
    SharedSecret::new(public, secret).secret_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(byte: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[byte; 32]).unwrap()
    }

    #[test]
    fn ephemeral_public_key_vector() {
        // BOLT 8 Appendix A initiator ephemeral key
        let e = pair(0x12);
        assert_eq!(
            hex::encode(e.public_key_bytes()),
            "036360e856310ce5d294e8be33fc807077dc56ac80d95d9cd4ddbd21325eff73f7"
        );
    }

    #[test]
    fn responder_static_public_key_vector() {
        let rs = pair(0x21);
        assert_eq!(
            hex::encode(rs.public_key_bytes()),
            "028d7500dd4c12685d1f568b4c2b5048e8534b873319f3a8daa612b469132ec7f7"
        );
    }

    #[test]
    fn ecdh_vector() {
        // es = ECDH(rs.pub, e.priv) from BOLT 8 Appendix A
        let e = pair(0x12);
        let rs = pair(0x21);
        assert_eq!(
            hex::encode(e.ecdh(&rs.public_key())),
            "1e2fb3c8fe8fb9f262f649f64d26ecf0f2c0a805a767cf02dc2d77a6ef1fdcc3"
        );
    }

    #[test]
    fn ecdh_is_symmetric() {
        let a = pair(0x31);
        let b = pair(0x42);
        assert_eq!(a.ecdh(&b.public_key()), b.ecdh(&a.public_key()));
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(matches!(KeyPair::from_secret_bytes(&[0u8; 32]), Err(CryptoError::InvalidSecretKey)));
    }

    #[test]
    fn generate_skips_invalid_candidates() {
        let mut calls = 0u8;
        let generated = KeyPair::generate(|buf| {
            calls += 1;
            // First candidate is the invalid zero scalar
            buf.fill(if calls == 1 { 0 } else { 0x12 });
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(generated.public_key(), pair(0x12).public_key());
    }

    #[test]
    fn generate_gives_up_on_broken_source() {
        let result = KeyPair::generate(|buf| buf.fill(0));
        assert!(matches!(result, Err(CryptoError::KeyGeneration { attempts: 16 })));
    }

    #[test]
    fn parse_rejects_uncompressed_prefix() {
        let mut bytes = pair(0x21).public_key_bytes();
        bytes[0] = 0x04;
        assert_eq!(parse_public_key(&bytes), Err(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let bytes = pair(0x21).public_key_bytes();
        assert_eq!(parse_public_key(&bytes[..32]), Err(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn parse_roundtrips_compressed_key() {
        let kp = pair(0x21);
        assert_eq!(parse_public_key(&kp.public_key_bytes()), Ok(kp.public_key()));
    }

    #[test]
    fn debug_does_not_print_secret() {
        let kp = pair(0x55);
        let rendered = format!("{kp:?}");
        assert!(!rendered.contains(&hex::encode(kp.secret_bytes())));
    }
}
