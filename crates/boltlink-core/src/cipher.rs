//! Transport cipher with periodic key rotation.
//!
//! After the handshake each direction owns an independent cipher state: a
//! 32-byte key, a 32-byte chaining key and a 64-bit nonce counter. Every
//! packet consumes two nonces, one for the encrypted length prefix and one
//! for the body.
//!
//! # Packet Layout
//!
//! ```text
//! ┌─────────────────────────┬──────────────────────────────────┐
//! │ enc(len: u16 BE) + tag  │ enc(body) + tag                  │
//! │ 18 bytes                │ len + 16 bytes                   │
//! └─────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! # Rotation
//!
//! When a direction's counter reaches [`KEY_ROTATION_INTERVAL`] the state is
//! replaced with `(ck', k') = HKDF(ck, k)` and the counter resets to zero.
//! The check runs after each individual nonce use, so rotation can land
//! between the length and the body of the same packet.
//!
//! # Security Properties
//!
//! - Forward Secrecy: old keys are overwritten when rotating
//! - Direction Isolation: send and receive states never share a key

use boltlink_crypto::{MAC_SIZE, decrypt_with_ad, encrypt_with_ad, hkdf};
use zeroize::Zeroize;

use crate::error::ChannelError;

/// Nonce count after which a direction rotates its key.
pub const KEY_ROTATION_INTERVAL: u64 = 1000;

/// Largest plaintext a single packet can carry.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Size of the plaintext length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Size of the encrypted length prefix including its tag.
pub const ENCRYPTED_LENGTH_SIZE: usize = LENGTH_PREFIX_SIZE + MAC_SIZE;

/// One direction of the transport.
struct CipherState {
    key: [u8; 32],
    chain_key: [u8; 32],
    nonce: u64,
    rotations: u64,
}

impl CipherState {
    fn new(key: [u8; 32], chain_key: [u8; 32]) -> Self {
        Self { key, chain_key, nonce: 0, rotations: 0 }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = encrypt_with_ad(&self.key, self.nonce, &[], plaintext);
        self.advance();
        ciphertext
    }

    /// Decrypt and advance. The nonce is left untouched on failure.
    fn decrypt(&mut self, ciphertext: &[u8], context: &'static str) -> Result<Vec<u8>, ChannelError> {
        let plaintext = decrypt_with_ad(&self.key, self.nonce, &[], ciphertext)
            .map_err(|_| ChannelError::AuthenticationFailed { context })?;
        self.advance();
        Ok(plaintext)
    }

    fn advance(&mut self) {
        self.nonce += 1;
        if self.nonce == KEY_ROTATION_INTERVAL {
            self.rotate();
        }
    }

    fn rotate(&mut self) {
        let (next_chain_key, next_key) = hkdf(&self.chain_key, &self.key);

        self.chain_key.zeroize();
        self.key.zeroize();
        self.chain_key = next_chain_key;
        self.key = next_key;
        self.nonce = 0;
        self.rotations += 1;
    }
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.key.zeroize();
        self.chain_key.zeroize();
    }
}

/// Bidirectional transport cipher derived from a completed handshake.
///
/// Both directions start from the final handshake chaining key and rotate
/// independently.
pub struct TransportCipher {
    send: CipherState,
    recv: CipherState,
}

impl TransportCipher {
    /// Create a cipher from the split handshake keys.
    ///
    /// `chain_key` is the final handshake chaining key, used as the initial
    /// rotation salt for both directions.
    pub fn new(send_key: [u8; 32], recv_key: [u8; 32], chain_key: [u8; 32]) -> Self {
        Self { send: CipherState::new(send_key, chain_key), recv: CipherState::new(recv_key, chain_key) }
    }

    /// Encrypt one message into a complete packet.
    ///
    /// # Errors
    ///
    /// - `MessageTooLarge` if the plaintext does not fit the 16-bit length
    ///   prefix. No nonce is consumed.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let Ok(length) = u16::try_from(plaintext.len()) else {
            return Err(ChannelError::MessageTooLarge { size: plaintext.len(), max: MAX_MESSAGE_SIZE });
        };

        let rotations_before = self.send.rotations;

        let mut packet = Vec::with_capacity(ENCRYPTED_LENGTH_SIZE + plaintext.len() + MAC_SIZE);
        packet.extend_from_slice(&self.send.encrypt(&length.to_be_bytes()));
        packet.extend_from_slice(&self.send.encrypt(plaintext));

        if self.send.rotations != rotations_before {
            tracing::trace!(rotations = self.send.rotations, "send key rotated");
        }

        Ok(packet)
    }

    /// Decrypt an 18-byte encrypted length prefix.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` if the tag does not verify
    pub fn decrypt_length(&mut self, header: &[u8; ENCRYPTED_LENGTH_SIZE]) -> Result<u16, ChannelError> {
        let plaintext = self.recv_decrypt(header, "packet length")?;

        let mut length = [0u8; LENGTH_PREFIX_SIZE];
        length.copy_from_slice(&plaintext);
        Ok(u16::from_be_bytes(length))
    }

    /// Decrypt a packet body of `length + 16` bytes.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` if the tag does not verify
    pub fn decrypt_message(&mut self, body: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.recv_decrypt(body, "packet body")
    }

    fn recv_decrypt(&mut self, ciphertext: &[u8], context: &'static str) -> Result<Vec<u8>, ChannelError> {
        let rotations_before = self.recv.rotations;
        let plaintext = self.recv.decrypt(ciphertext, context)?;
        if self.recv.rotations != rotations_before {
            tracing::trace!(rotations = self.recv.rotations, "receive key rotated");
        }
        Ok(plaintext)
    }

    /// Nonce the next outgoing ciphertext will use.
    pub fn send_nonce(&self) -> u64 {
        self.send.nonce
    }

    /// Nonce the next incoming ciphertext must use.
    pub fn recv_nonce(&self) -> u64 {
        self.recv.nonce
    }

    /// Number of times the send key has rotated.
    pub fn send_rotations(&self) -> u64 {
        self.send.rotations
    }

    /// Number of times the receive key has rotated.
    pub fn recv_rotations(&self) -> u64 {
        self.recv.rotations
    }
}

impl std::fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCipher")
            .field("send_nonce", &self.send.nonce)
            .field("send_rotations", &self.send.rotations)
            .field("recv_nonce", &self.recv.nonce)
            .field("recv_rotations", &self.recv.rotations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn hex32(s: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }

    /// Initiator transport keys from BOLT 8 Appendix A.
    fn vector_cipher() -> TransportCipher {
        TransportCipher::new(
            hex32("969ab31b4d288cedf6218839b27a3e2140827047f2c0f01bf5c04435d43511a9"),
            hex32("bb9020b8965f4df047e07f955f3c4b88418984aadc5cdb35096b9ea8fa5c3442"),
            hex32("919219dbb2920afa8db80f9a51787a840bcf111ed8d588caf9ab4be716e42b01"),
        )
    }

    /// The same session seen from the responder.
    fn vector_peer() -> TransportCipher {
        TransportCipher::new(
            hex32("bb9020b8965f4df047e07f955f3c4b88418984aadc5cdb35096b9ea8fa5c3442"),
            hex32("969ab31b4d288cedf6218839b27a3e2140827047f2c0f01bf5c04435d43511a9"),
            hex32("919219dbb2920afa8db80f9a51787a840bcf111ed8d588caf9ab4be716e42b01"),
        )
    }

    #[test]
    fn message_encryption_vectors() {
        let mut cipher = vector_cipher();
        let expected = [
            (0, "cf2b30ddf0cf3f80e7c35a6e6730b59fe802473180f396d88a8fb0db8cbcf25d2f214cf9ea1d95"),
            (1, "72887022101f0b6753e0c7de21657d35a4cb2a1f5cde2650528bbc8f837d0f0d7ad833b1a256a1"),
            (500, "178cb9d7387190fa34db9c2d50027d21793c9bc2d40b1e14dcf30ebeeeb220f48364f7a4c68bf8"),
            (501, "1b186c57d44eb6de4c057c49940d79bb838a145cb528d6e8fd26dbe50a60ca2c104b56b60e45bd"),
            (1000, "4a2f3cc3b5e78ddb83dcb426d9863d9d9a723b0337c89dd0b005d89f8d3c05c52b76b29b740f09"),
            (1001, "2ecd8c8a5629d0d02ab457a0fdd0f7b90a192cd46be5ecb6ca570bfc5e268338b1a16cf4ef2d36"),
        ];

        let mut expected = expected.iter().peekable();
        for i in 0..=1001 {
            let packet = cipher.encrypt(b"hello").unwrap();
            if let Some((index, hex_packet)) = expected.peek()
                && *index == i
            {
                assert_eq!(hex::encode(&packet), *hex_packet, "output {i}");
                expected.next();
            }
        }
        assert!(expected.next().is_none());
    }

    #[test]
    fn nonce_advances_by_two_per_message() {
        let mut cipher = vector_cipher();
        cipher.encrypt(b"a").unwrap();
        assert_eq!(cipher.send_nonce(), 2);
        cipher.encrypt(b"").unwrap();
        assert_eq!(cipher.send_nonce(), 4);
        assert_eq!(cipher.recv_nonce(), 0);
    }

    #[test]
    fn rotation_resets_nonce() {
        let mut cipher = vector_cipher();
        for _ in 0..500 {
            cipher.encrypt(b"x").unwrap();
        }

        // 1000 nonces used: rotated exactly once, counter back at zero
        assert_eq!(cipher.send_rotations(), 1);
        assert_eq!(cipher.send_nonce(), 0);
        assert_eq!(cipher.recv_rotations(), 0);
    }

    #[test]
    fn decrypt_follows_sender_across_rotation() {
        let mut sender = vector_cipher();
        let mut receiver = vector_peer();

        for i in 0..1200u32 {
            let message = i.to_be_bytes();
            let packet = sender.encrypt(&message).unwrap();

            let mut header = [0u8; ENCRYPTED_LENGTH_SIZE];
            header.copy_from_slice(&packet[..ENCRYPTED_LENGTH_SIZE]);
            let length = receiver.decrypt_length(&header).unwrap();
            assert_eq!(usize::from(length), message.len());

            let body = receiver.decrypt_message(&packet[ENCRYPTED_LENGTH_SIZE..]).unwrap();
            assert_eq!(body, message);
        }

        assert_eq!(receiver.recv_rotations(), sender.send_rotations());
        assert_eq!(receiver.recv_nonce(), sender.send_nonce());
    }

    #[test]
    fn oversized_message_consumes_no_nonce() {
        let mut cipher = vector_cipher();
        let result = cipher.encrypt(&vec![0u8; MAX_MESSAGE_SIZE + 1]);

        assert_eq!(result, Err(ChannelError::MessageTooLarge { size: MAX_MESSAGE_SIZE + 1, max: MAX_MESSAGE_SIZE }));
        assert_eq!(cipher.send_nonce(), 0);
    }

    #[test]
    fn maximum_message_fits() {
        let mut cipher = vector_cipher();
        let packet = cipher.encrypt(&vec![0xAB; MAX_MESSAGE_SIZE]).unwrap();
        assert_eq!(packet.len(), ENCRYPTED_LENGTH_SIZE + MAX_MESSAGE_SIZE + MAC_SIZE);
    }

    #[test]
    fn tampered_length_rejected_without_advancing() {
        let mut sender = vector_cipher();
        let mut receiver = vector_peer();

        let packet = sender.encrypt(b"hello").unwrap();
        let mut header = [0u8; ENCRYPTED_LENGTH_SIZE];
        header.copy_from_slice(&packet[..ENCRYPTED_LENGTH_SIZE]);
        header[0] ^= 0x01;

        assert_eq!(
            receiver.decrypt_length(&header),
            Err(ChannelError::AuthenticationFailed { context: "packet length" })
        );
        assert_eq!(receiver.recv_nonce(), 0);
    }

    proptest! {
        #[test]
        fn prop_packet_size_is_payload_plus_overhead(len in 0usize..4096) {
            let mut cipher = vector_cipher();
            let packet = cipher.encrypt(&vec![0u8; len]).unwrap();

            // PROPERTY: every packet is 18 + len + 16 bytes
            prop_assert_eq!(packet.len(), ENCRYPTED_LENGTH_SIZE + len + MAC_SIZE);
        }
    }
}
