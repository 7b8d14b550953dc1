//! Transcript hashing and key derivation.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of `prefix || data`.
///
/// This is the `h = SHA256(h || x)` mixing step used throughout the
/// handshake, computed without allocating the concatenation.
pub fn sha256_concat(prefix: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prefix);
    hasher.update(data);
    hasher.finalize().into()
}

/// HKDF-SHA256 with `salt` and `ikm`, expanded with empty info to 64 bytes.
///
/// Returns the output split into two 32-byte halves. Used both for
/// `(ck, temp_k) = HKDF(ck, ss)` during the handshake and for
/// `(ck', k') = HKDF(ck, k)` during key rotation.
pub fn hkdf(salt: &[u8; 32], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);

    let mut okm = [0u8; 64];
    let Ok(()) = hkdf.expand(&[], &mut okm) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    okm.zeroize();

    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex32(s: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }

    #[test]
    fn sha256_empty_input() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_concat_matches_single_digest() {
        let joined = [b"transcript".as_slice(), b"-data".as_slice()].concat();
        assert_eq!(sha256_concat(b"transcript", b"-data"), sha256(&joined));
    }

    #[test]
    fn hkdf_act_one_vector() {
        // BOLT 8 Appendix A, initiator act one: (ck, temp_k1) = HKDF(ck, es)
        let ck = hex32("2640f52eebcd9e882958951c794250eedb28002c05d7dc2ea0f195406042caf1");
        let es = hex32("1e2fb3c8fe8fb9f262f649f64d26ecf0f2c0a805a767cf02dc2d77a6ef1fdcc3");

        let (next_ck, temp_k1) = hkdf(&ck, &es);

        assert_eq!(
            hex::encode(next_ck),
            "b61ec1191326fa240decc9564369dbb3ae2b34341d1e11ad64ed89f89180582f"
        );
        assert_eq!(
            hex::encode(temp_k1),
            "e68f69b7f096d7917245f5e5cf8ae1595febe4d4644333c99f9c4a1282031c9f"
        );
    }

    #[test]
    fn hkdf_halves_differ() {
        let (a, b) = hkdf(&[7u8; 32], &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn hkdf_is_deterministic() {
        let salt = [0x42u8; 32];
        assert_eq!(hkdf(&salt, b"ikm"), hkdf(&salt, b"ikm"));
        assert_ne!(hkdf(&salt, b"ikm"), hkdf(&salt, b"other"));
    }
}
