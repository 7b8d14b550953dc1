//! Noise XK handshake engine.
//!
//! Implements `Noise_XK_secp256k1_ChaChaPoly_SHA256` with the prologue
//! `lightning`. The initiator knows the responder's static key in advance;
//! the responder learns the initiator's static key from act three.
//!
//! # Message Flow
//!
//! ```text
//! Initiator                                      Responder
//!     │                                              │
//!     │ ── act one: 0 || e.pub || tag (50) ───────>  │  es
//!     │                                              │
//!     │ <─ act two: 0 || e.pub || tag (50) ───────── │  ee
//!     │                                              │
//!     │ ── act three: 0 || enc(s.pub) || tag (66) ─> │  se
//!     │                                              │
//!     ├──────────── transport keys split ────────────┤
//! ```
//!
//! The engine is a pure step machine: each call validates that it is the
//! expected next step for this role, mutates the transcript and returns the
//! bytes to send. Any error poisons the engine; a failed handshake is never
//! resumed.

use boltlink_crypto::{
    KeyPair, MAC_SIZE, PUBLIC_KEY_SIZE, PublicKey, decrypt_with_ad, encrypt_with_ad, hkdf,
    parse_public_key, sha256, sha256_concat,
};
use zeroize::Zeroize;

use crate::{
    cipher::{ENCRYPTED_LENGTH_SIZE, TransportCipher},
    error::{Act, ChannelError},
};

/// Noise protocol name, hashed into the initial transcript.
pub const PROTOCOL_NAME: &[u8] = b"Noise_XK_secp256k1_ChaChaPoly_SHA256";

/// Prologue mixed into the transcript before any act.
pub const PROLOGUE: &[u8] = b"lightning";

/// Version byte carried by every act.
pub const HANDSHAKE_VERSION: u8 = 0;

/// Wire size of act one.
pub const ACT_ONE_SIZE: usize = 1 + PUBLIC_KEY_SIZE + MAC_SIZE;

/// Wire size of act two.
pub const ACT_TWO_SIZE: usize = 1 + PUBLIC_KEY_SIZE + MAC_SIZE;

/// Wire size of act three.
pub const ACT_THREE_SIZE: usize = 1 + PUBLIC_KEY_SIZE + MAC_SIZE + MAC_SIZE;

impl Act {
    /// Fixed wire size of this act.
    pub const fn size(self) -> usize {
        match self {
            Self::One => ACT_ONE_SIZE,
            Self::Two => ACT_TWO_SIZE,
            Self::Three => ACT_THREE_SIZE,
        }
    }
}

/// Which side of the handshake this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Knows the remote static key, sends act one
    Initiator,
    /// Learns the remote static key from act three
    Responder,
}

/// Next act the engine will handle, for either role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ActOne,
    ActTwo,
    ActThree,
    Complete,
    Failed,
}

impl Step {
    fn label(self) -> &'static str {
        match self {
            Self::ActOne => "ActOne",
            Self::ActTwo => "ActTwo",
            Self::ActThree => "ActThree",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }
}

/// Running handshake hash and chaining key.
struct Transcript {
    h: [u8; 32],
    ck: [u8; 32],
}

impl Transcript {
    /// `h = SHA256(name); ck = h; h = SHA256(h || prologue); h = SHA256(h ||
    /// responder_static)`
    fn new(responder_static: &PublicKey) -> Self {
        let h = sha256(PROTOCOL_NAME);
        let mut transcript = Self { h, ck: h };
        transcript.mix_hash(PROLOGUE);
        transcript.mix_hash(&responder_static.serialize());
        transcript
    }

    fn mix_hash(&mut self, data: &[u8]) {
        self.h = sha256_concat(&self.h, data);
    }

    /// `(ck, temp_k) = HKDF(ck, shared_secret)`. Returns `temp_k`.
    fn mix_key(&mut self, shared_secret: &[u8; 32]) -> [u8; 32] {
        let (ck, temp_k) = hkdf(&self.ck, shared_secret);
        self.ck.zeroize();
        self.ck = ck;
        temp_k
    }
}

impl Drop for Transcript {
    fn drop(&mut self) {
        self.h.zeroize();
        self.ck.zeroize();
    }
}

/// Parsed `version || pubkey || tag` of act one or act two.
struct EphemeralAct<'a> {
    public_bytes: &'a [u8],
    public: PublicKey,
    tag: &'a [u8],
}

fn parse_ephemeral_act(act: Act, message: &[u8]) -> Result<EphemeralAct<'_>, ChannelError> {
    check_header(act, message)?;

    let public_bytes = &message[1..1 + PUBLIC_KEY_SIZE];
    let public = parse_public_key(public_bytes).map_err(|_| ChannelError::InvalidPublicKey { act })?;

    Ok(EphemeralAct { public_bytes, public, tag: &message[1 + PUBLIC_KEY_SIZE..] })
}

/// Exact length first, then the version byte.
fn check_header(act: Act, message: &[u8]) -> Result<(), ChannelError> {
    if message.len() != act.size() {
        return Err(ChannelError::HandshakeLengthMismatch {
            act,
            expected: act.size(),
            actual: message.len(),
        });
    }

    let version = message[0];
    if version != HANDSHAKE_VERSION {
        return Err(ChannelError::UnsupportedVersion { act, version });
    }

    Ok(())
}

/// Noise XK handshake state for one side of one connection.
pub struct HandshakeEngine {
    role: Role,
    step: Step,
    local_static: KeyPair,
    local_ephemeral: Option<KeyPair>,
    remote_static: Option<PublicKey>,
    remote_ephemeral: Option<PublicKey>,
    transcript: Transcript,
    /// Act two key, reused with nonce 1 to encrypt the static key in act three
    temp_k2: [u8; 32],
    cipher: Option<TransportCipher>,
}

impl HandshakeEngine {
    /// Create an initiator that will authenticate `remote_static`.
    pub fn initiator(local_static: KeyPair, remote_static: PublicKey) -> Self {
        let transcript = Transcript::new(&remote_static);
        Self::new(Role::Initiator, local_static, Some(remote_static), transcript)
    }

    /// Create a responder identified by `local_static`.
    pub fn responder(local_static: KeyPair) -> Self {
        let transcript = Transcript::new(&local_static.public_key());
        Self::new(Role::Responder, local_static, None, transcript)
    }

    fn new(
        role: Role,
        local_static: KeyPair,
        remote_static: Option<PublicKey>,
        transcript: Transcript,
    ) -> Self {
        Self {
            role,
            step: Step::ActOne,
            local_static,
            local_ephemeral: None,
            remote_static,
            remote_ephemeral: None,
            transcript,
            temp_k2: [0u8; 32],
            cipher: None,
        }
    }

    /// Role this engine plays.
    pub fn role(&self) -> Role {
        self.role
    }

    /// True once the transport keys are derived.
    pub fn is_complete(&self) -> bool {
        self.step == Step::Complete
    }

    /// The peer's static key. Known from the start for initiators, after act
    /// three for responders.
    pub fn remote_static(&self) -> Option<PublicKey> {
        self.remote_static
    }

    /// Final handshake hash, identical on both sides of a completed
    /// handshake. `None` until complete.
    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        self.is_complete().then_some(self.transcript.h)
    }

    /// The transport cipher. `None` until complete.
    pub fn cipher(&self) -> Option<&TransportCipher> {
        self.cipher.as_ref()
    }

    /// Take the transport cipher out of a completed engine.
    pub fn into_cipher(mut self) -> Option<TransportCipher> {
        self.cipher.take()
    }

    /// Initiator: produce act one with a fresh ephemeral key.
    ///
    /// # Errors
    ///
    /// - `ProtocolOutOfOrder` if not an initiator awaiting act one
    pub fn produce_act_one(&mut self, ephemeral: KeyPair) -> Result<[u8; ACT_ONE_SIZE], ChannelError> {
        let result = self.write_act_one(ephemeral);
        self.guard(result)
    }

    fn write_act_one(&mut self, ephemeral: KeyPair) -> Result<[u8; ACT_ONE_SIZE], ChannelError> {
        self.expect(Role::Initiator, Step::ActOne, "produce act one")?;
        let remote_static = self.require(self.remote_static, "produce act one")?;

        let e_pub = ephemeral.public_key_bytes();
        self.transcript.mix_hash(&e_pub);

        let mut es = ephemeral.ecdh(&remote_static);
        let mut temp_k1 = self.transcript.mix_key(&es);
        es.zeroize();

        let tag = encrypt_with_ad(&temp_k1, 0, &self.transcript.h, &[]);
        temp_k1.zeroize();
        self.transcript.mix_hash(&tag);

        let mut act = [0u8; ACT_ONE_SIZE];
        act[0] = HANDSHAKE_VERSION;
        act[1..1 + PUBLIC_KEY_SIZE].copy_from_slice(&e_pub);
        act[1 + PUBLIC_KEY_SIZE..].copy_from_slice(&tag);

        self.local_ephemeral = Some(ephemeral);
        self.step = Step::ActTwo;
        tracing::trace!(role = ?self.role, "act one produced");

        Ok(act)
    }

    /// Responder: verify act one.
    ///
    /// # Errors
    ///
    /// - `HandshakeLengthMismatch` unless exactly 50 bytes
    /// - `UnsupportedVersion` if the version byte is not zero
    /// - `InvalidPublicKey` if the ephemeral key does not parse
    /// - `AuthenticationFailed` if the tag does not verify
    /// - `ProtocolOutOfOrder` if not a responder awaiting act one
    pub fn consume_act_one(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let result = self.read_act_one(message);
        self.guard(result)
    }

    fn read_act_one(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        self.expect(Role::Responder, Step::ActOne, "consume act one")?;
        let act = parse_ephemeral_act(Act::One, message)?;

        self.transcript.mix_hash(act.public_bytes);

        let mut es = self.local_static.ecdh(&act.public);
        let mut temp_k1 = self.transcript.mix_key(&es);
        es.zeroize();

        let verified = decrypt_with_ad(&temp_k1, 0, &self.transcript.h, act.tag);
        temp_k1.zeroize();
        verified.map_err(|_| ChannelError::AuthenticationFailed { context: "act one tag" })?;
        self.transcript.mix_hash(act.tag);

        self.remote_ephemeral = Some(act.public);
        self.step = Step::ActTwo;
        tracing::trace!(role = ?self.role, "act one verified");

        Ok(())
    }

    /// Responder: produce act two with a fresh ephemeral key.
    ///
    /// # Errors
    ///
    /// - `ProtocolOutOfOrder` if act one has not been verified
    pub fn produce_act_two(&mut self, ephemeral: KeyPair) -> Result<[u8; ACT_TWO_SIZE], ChannelError> {
        let result = self.write_act_two(ephemeral);
        self.guard(result)
    }

    fn write_act_two(&mut self, ephemeral: KeyPair) -> Result<[u8; ACT_TWO_SIZE], ChannelError> {
        self.expect(Role::Responder, Step::ActTwo, "produce act two")?;
        let remote_ephemeral = self.require(self.remote_ephemeral, "produce act two")?;

        let e_pub = ephemeral.public_key_bytes();
        self.transcript.mix_hash(&e_pub);

        let mut ee = ephemeral.ecdh(&remote_ephemeral);
        self.temp_k2 = self.transcript.mix_key(&ee);
        ee.zeroize();

        let tag = encrypt_with_ad(&self.temp_k2, 0, &self.transcript.h, &[]);
        self.transcript.mix_hash(&tag);

        let mut act = [0u8; ACT_TWO_SIZE];
        act[0] = HANDSHAKE_VERSION;
        act[1..1 + PUBLIC_KEY_SIZE].copy_from_slice(&e_pub);
        act[1 + PUBLIC_KEY_SIZE..].copy_from_slice(&tag);

        self.local_ephemeral = Some(ephemeral);
        self.step = Step::ActThree;
        tracing::trace!(role = ?self.role, "act two produced");

        Ok(act)
    }

    /// Initiator: verify act two.
    ///
    /// # Errors
    ///
    /// - `HandshakeLengthMismatch` unless exactly 50 bytes
    /// - `UnsupportedVersion` if the version byte is not zero
    /// - `InvalidPublicKey` if the ephemeral key does not parse
    /// - `AuthenticationFailed` if the tag does not verify
    /// - `ProtocolOutOfOrder` if not an initiator awaiting act two
    pub fn consume_act_two(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let result = self.read_act_two(message);
        self.guard(result)
    }

    fn read_act_two(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        self.expect(Role::Initiator, Step::ActTwo, "consume act two")?;
        let act = parse_ephemeral_act(Act::Two, message)?;

        self.transcript.mix_hash(act.public_bytes);

        let ephemeral = self.require(self.local_ephemeral.as_ref(), "consume act two")?;
        let mut ee = ephemeral.ecdh(&act.public);
        let temp_k2 = self.transcript.mix_key(&ee);
        ee.zeroize();

        decrypt_with_ad(&temp_k2, 0, &self.transcript.h, act.tag)
            .map_err(|_| ChannelError::AuthenticationFailed { context: "act two tag" })?;
        self.transcript.mix_hash(act.tag);

        self.temp_k2 = temp_k2;
        self.remote_ephemeral = Some(act.public);
        self.step = Step::ActThree;
        tracing::trace!(role = ?self.role, "act two verified");

        Ok(())
    }

    /// Initiator: produce act three and derive the transport keys.
    ///
    /// # Errors
    ///
    /// - `ProtocolOutOfOrder` if act two has not been verified
    pub fn produce_act_three(&mut self) -> Result<[u8; ACT_THREE_SIZE], ChannelError> {
        let result = self.write_act_three();
        self.guard(result)
    }

    fn write_act_three(&mut self) -> Result<[u8; ACT_THREE_SIZE], ChannelError> {
        self.expect(Role::Initiator, Step::ActThree, "produce act three")?;
        let remote_ephemeral = self.require(self.remote_ephemeral, "produce act three")?;

        let encrypted_static =
            encrypt_with_ad(&self.temp_k2, 1, &self.transcript.h, &self.local_static.public_key_bytes());
        self.transcript.mix_hash(&encrypted_static);

        let mut se = self.local_static.ecdh(&remote_ephemeral);
        let mut temp_k3 = self.transcript.mix_key(&se);
        se.zeroize();

        let tag = encrypt_with_ad(&temp_k3, 0, &self.transcript.h, &[]);
        temp_k3.zeroize();

        let (send_key, recv_key) = hkdf(&self.transcript.ck, &[]);
        self.cipher = Some(TransportCipher::new(send_key, recv_key, self.transcript.ck));

        let mut act = [0u8; ACT_THREE_SIZE];
        act[0] = HANDSHAKE_VERSION;
        act[1..1 + encrypted_static.len()].copy_from_slice(&encrypted_static);
        act[1 + encrypted_static.len()..].copy_from_slice(&tag);

        self.finish();
        Ok(act)
    }

    /// Responder: verify act three, learn the initiator's static key and
    /// derive the transport keys.
    ///
    /// # Errors
    ///
    /// - `HandshakeLengthMismatch` unless exactly 66 bytes
    /// - `UnsupportedVersion` if the version byte is not zero
    /// - `AuthenticationFailed` if either ciphertext fails to verify
    /// - `InvalidPublicKey` if the decrypted static key does not parse
    /// - `ProtocolOutOfOrder` if act two has not been sent
    pub fn consume_act_three(&mut self, message: &[u8]) -> Result<PublicKey, ChannelError> {
        let result = self.read_act_three(message);
        self.guard(result)
    }

    fn read_act_three(&mut self, message: &[u8]) -> Result<PublicKey, ChannelError> {
        self.expect(Role::Responder, Step::ActThree, "consume act three")?;
        check_header(Act::Three, message)?;

        let static_end = 1 + PUBLIC_KEY_SIZE + MAC_SIZE;
        let encrypted_static = &message[1..static_end];
        let tag = &message[static_end..];

        let static_bytes = decrypt_with_ad(&self.temp_k2, 1, &self.transcript.h, encrypted_static)
            .map_err(|_| ChannelError::AuthenticationFailed { context: "act three static key" })?;
        let remote_static = parse_public_key(&static_bytes)
            .map_err(|_| ChannelError::InvalidPublicKey { act: Act::Three })?;
        self.transcript.mix_hash(encrypted_static);

        let ephemeral = self.require(self.local_ephemeral.as_ref(), "consume act three")?;
        let mut se = ephemeral.ecdh(&remote_static);
        let mut temp_k3 = self.transcript.mix_key(&se);
        se.zeroize();

        let verified = decrypt_with_ad(&temp_k3, 0, &self.transcript.h, tag);
        temp_k3.zeroize();
        verified.map_err(|_| ChannelError::AuthenticationFailed { context: "act three tag" })?;

        let (recv_key, send_key) = hkdf(&self.transcript.ck, &[]);
        self.cipher = Some(TransportCipher::new(send_key, recv_key, self.transcript.ck));
        self.remote_static = Some(remote_static);

        self.finish();
        Ok(remote_static)
    }

    /// Encrypt one transport message.
    ///
    /// # Errors
    ///
    /// - `NotReady` before the handshake completes
    /// - `MessageTooLarge` above 65535 bytes
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.cipher_mut()?.encrypt(plaintext)
    }

    /// Decrypt an encrypted length prefix.
    ///
    /// # Errors
    ///
    /// - `NotReady` before the handshake completes
    /// - `AuthenticationFailed` if the tag does not verify
    pub fn decrypt_length(&mut self, header: &[u8; ENCRYPTED_LENGTH_SIZE]) -> Result<u16, ChannelError> {
        self.cipher_mut()?.decrypt_length(header)
    }

    /// Decrypt a packet body.
    ///
    /// # Errors
    ///
    /// - `NotReady` before the handshake completes
    /// - `AuthenticationFailed` if the tag does not verify
    pub fn decrypt_message(&mut self, body: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.cipher_mut()?.decrypt_message(body)
    }

    fn cipher_mut(&mut self) -> Result<&mut TransportCipher, ChannelError> {
        self.cipher.as_mut().ok_or(ChannelError::NotReady)
    }

    fn expect(&self, role: Role, step: Step, operation: &'static str) -> Result<(), ChannelError> {
        if self.role != role || self.step != step {
            return Err(ChannelError::ProtocolOutOfOrder { operation, state: self.step.label() });
        }
        Ok(())
    }

    fn require<T>(&self, value: Option<T>, operation: &'static str) -> Result<T, ChannelError> {
        value.ok_or(ChannelError::ProtocolOutOfOrder { operation, state: self.step.label() })
    }

    /// Drop handshake-only secrets once transport keys exist.
    fn finish(&mut self) {
        self.temp_k2.zeroize();
        self.local_ephemeral = None;
        self.remote_ephemeral = None;
        self.step = Step::Complete;
        tracing::debug!(role = ?self.role, "handshake complete");
    }

    fn guard<T>(&mut self, result: Result<T, ChannelError>) -> Result<T, ChannelError> {
        if result.is_err() {
            self.temp_k2.zeroize();
            self.local_ephemeral = None;
            self.step = Step::Failed;
        }
        result
    }
}

impl Drop for HandshakeEngine {
    fn drop(&mut self) {
        self.temp_k2.zeroize();
    }
}

impl std::fmt::Debug for HandshakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeEngine")
            .field("role", &self.role)
            .field("step", &self.step)
            .field("remote_static", &self.remote_static)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RS_PUB: &str = "028d7500dd4c12685d1f568b4c2b5048e8534b873319f3a8daa612b469132ec7f7";
    const LS_PUB: &str = "034f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa";

    const ACT_ONE: &str = "00036360e856310ce5d294e8be33fc807077dc56ac80d95d9cd4ddbd21325eff73f70df6086551151f58b8afe6c195782c6a";
    const ACT_TWO: &str = "0002466d7fcae563e5cb09a0d1870bb580344804617879a14949cf22285f1bae3f276e2470b93aac583c9ef6eafca3f730ae";
    const ACT_THREE: &str = "00b9e3a702e93e3a9948c2ed6e5fd7590a6e1c3a0344cfc9d5b57357049aa22355361aa02e55a8fc28fef5bd6d71ad0c38228dc68b1c466263b47fdf31e560e139ba";

    fn pair(byte: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[byte; 32]).unwrap()
    }

    fn initiator() -> HandshakeEngine {
        let rs = parse_public_key(&hex::decode(RS_PUB).unwrap()).unwrap();
        HandshakeEngine::initiator(pair(0x11), rs)
    }

    fn responder() -> HandshakeEngine {
        HandshakeEngine::responder(pair(0x21))
    }

    /// Responder that has verified act one and sent act two.
    fn responder_after_act_two() -> HandshakeEngine {
        let mut engine = responder();
        engine.consume_act_one(&hex::decode(ACT_ONE).unwrap()).unwrap();
        engine.produce_act_two(pair(0x22)).unwrap();
        engine
    }

    /// Initiator that has sent act one.
    fn initiator_after_act_one() -> HandshakeEngine {
        let mut engine = initiator();
        engine.produce_act_one(pair(0x12)).unwrap();
        engine
    }

    fn tweak(hex_str: &str, index: usize, value: u8) -> Vec<u8> {
        let mut bytes = hex::decode(hex_str).unwrap();
        bytes[index] = value;
        bytes
    }

    #[test]
    fn initiator_vectors() {
        let mut engine = initiator();

        let act_one = engine.produce_act_one(pair(0x12)).unwrap();
        assert_eq!(hex::encode(act_one), ACT_ONE);

        engine.consume_act_two(&hex::decode(ACT_TWO).unwrap()).unwrap();

        let act_three = engine.produce_act_three().unwrap();
        assert_eq!(hex::encode(act_three), ACT_THREE);
        assert!(engine.is_complete());
    }

    #[test]
    fn responder_vectors() {
        let mut engine = responder();

        engine.consume_act_one(&hex::decode(ACT_ONE).unwrap()).unwrap();
        let act_two = engine.produce_act_two(pair(0x22)).unwrap();
        assert_eq!(hex::encode(act_two), ACT_TWO);

        let remote_static = engine.consume_act_three(&hex::decode(ACT_THREE).unwrap()).unwrap();
        assert_eq!(hex::encode(remote_static.serialize()), LS_PUB);
        assert_eq!(engine.remote_static(), Some(remote_static));
        assert!(engine.is_complete());
    }

    #[test]
    fn both_sides_agree_on_transcript_and_keys() {
        let mut initiator = initiator();
        let mut responder = responder();

        let act_one = initiator.produce_act_one(pair(0x12)).unwrap();
        responder.consume_act_one(&act_one).unwrap();
        let act_two = responder.produce_act_two(pair(0x22)).unwrap();
        initiator.consume_act_two(&act_two).unwrap();
        let act_three = initiator.produce_act_three().unwrap();
        responder.consume_act_three(&act_three).unwrap();

        assert_eq!(initiator.handshake_hash(), responder.handshake_hash());

        let packet = initiator.encrypt(b"ping").unwrap();
        let mut header = [0u8; ENCRYPTED_LENGTH_SIZE];
        header.copy_from_slice(&packet[..ENCRYPTED_LENGTH_SIZE]);
        assert_eq!(responder.decrypt_length(&header).unwrap(), 4);
        assert_eq!(responder.decrypt_message(&packet[ENCRYPTED_LENGTH_SIZE..]).unwrap(), b"ping");
    }

    #[test]
    fn transport_keys_match_vector() {
        let mut engine = initiator();
        engine.produce_act_one(pair(0x12)).unwrap();
        engine.consume_act_two(&hex::decode(ACT_TWO).unwrap()).unwrap();
        engine.produce_act_three().unwrap();

        // First BOLT 8 transport vector only holds if sk, rk and ck match
        let packet = engine.encrypt(b"hello").unwrap();
        assert_eq!(
            hex::encode(packet),
            "cf2b30ddf0cf3f80e7c35a6e6730b59fe802473180f396d88a8fb0db8cbcf25d2f214cf9ea1d95"
        );
    }

    #[test]
    fn act_one_bad_version() {
        let mut engine = responder();
        let result = engine.consume_act_one(&tweak(ACT_ONE, 0, 0x01));
        assert_eq!(result, Err(ChannelError::UnsupportedVersion { act: Act::One, version: 1 }));
    }

    #[test]
    fn act_one_bad_key_serialization() {
        let mut engine = responder();
        let result = engine.consume_act_one(&tweak(ACT_ONE, 1, 0x04));
        assert_eq!(result, Err(ChannelError::InvalidPublicKey { act: Act::One }));
    }

    #[test]
    fn act_one_bad_mac() {
        let mut engine = responder();
        let result = engine.consume_act_one(&tweak(ACT_ONE, ACT_ONE_SIZE - 1, 0x6b));
        assert_eq!(result, Err(ChannelError::AuthenticationFailed { context: "act one tag" }));
    }

    #[test]
    fn act_one_wrong_length() {
        let mut engine = responder();
        let bytes = hex::decode(ACT_ONE).unwrap();
        let result = engine.consume_act_one(&bytes[..49]);
        assert_eq!(
            result,
            Err(ChannelError::HandshakeLengthMismatch { act: Act::One, expected: 50, actual: 49 })
        );
    }

    #[test]
    fn act_two_bad_version() {
        let mut engine = initiator_after_act_one();
        let result = engine.consume_act_two(&tweak(ACT_TWO, 0, 0x01));
        assert_eq!(result, Err(ChannelError::UnsupportedVersion { act: Act::Two, version: 1 }));
    }

    #[test]
    fn act_two_bad_key_serialization() {
        let mut engine = initiator_after_act_one();
        let result = engine.consume_act_two(&tweak(ACT_TWO, 1, 0x04));
        assert_eq!(result, Err(ChannelError::InvalidPublicKey { act: Act::Two }));
    }

    #[test]
    fn act_two_bad_mac() {
        let mut engine = initiator_after_act_one();
        let result = engine.consume_act_two(&tweak(ACT_TWO, ACT_TWO_SIZE - 1, 0xaf));
        assert_eq!(result, Err(ChannelError::AuthenticationFailed { context: "act two tag" }));
    }

    #[test]
    fn act_three_bad_version() {
        let mut engine = responder_after_act_two();
        let result = engine.consume_act_three(&tweak(ACT_THREE, 0, 0x01));
        assert_eq!(result, Err(ChannelError::UnsupportedVersion { act: Act::Three, version: 1 }));
    }

    #[test]
    fn act_three_bad_ciphertext() {
        let mut engine = responder_after_act_two();
        let result = engine.consume_act_three(&tweak(ACT_THREE, 1, 0xc9));
        assert_eq!(result, Err(ChannelError::AuthenticationFailed { context: "act three static key" }));
    }

    #[test]
    fn act_three_bad_public_key() {
        // Valid ciphertext over a static key with an uncompressed prefix
        let act_three = "00bfe3a702e93e3a9948c2ed6e5fd7590a6e1c3a0344cfc9d5b57357049aa2235536ad09a8ee351870c2bb7f78b754a26c6cef79a98d25139c856d7efd252c2ae73c";
        let mut engine = responder_after_act_two();
        let result = engine.consume_act_three(&hex::decode(act_three).unwrap());
        assert_eq!(result, Err(ChannelError::InvalidPublicKey { act: Act::Three }));
    }

    #[test]
    fn act_three_bad_mac() {
        let mut engine = responder_after_act_two();
        let result = engine.consume_act_three(&tweak(ACT_THREE, ACT_THREE_SIZE - 1, 0xbb));
        assert_eq!(result, Err(ChannelError::AuthenticationFailed { context: "act three tag" }));
    }

    #[test]
    fn act_three_wrong_length() {
        let mut engine = responder_after_act_two();
        let mut bytes = hex::decode(ACT_THREE).unwrap();
        bytes.push(0);
        let result = engine.consume_act_three(&bytes);
        assert_eq!(
            result,
            Err(ChannelError::HandshakeLengthMismatch { act: Act::Three, expected: 66, actual: 67 })
        );
    }

    #[test]
    fn wrong_role_is_out_of_order() {
        let mut engine = initiator();
        let result = engine.consume_act_one(&hex::decode(ACT_ONE).unwrap());
        assert!(matches!(result, Err(ChannelError::ProtocolOutOfOrder { .. })));

        let mut engine = responder();
        assert!(matches!(engine.produce_act_one(pair(0x12)), Err(ChannelError::ProtocolOutOfOrder { .. })));
    }

    #[test]
    fn skipping_an_act_is_out_of_order() {
        let mut engine = initiator();
        assert!(matches!(engine.produce_act_three(), Err(ChannelError::ProtocolOutOfOrder { .. })));
    }

    #[test]
    fn failure_poisons_engine() {
        let mut engine = responder();
        let _ = engine.consume_act_one(&tweak(ACT_ONE, 0, 0x01));

        // The valid act is refused after a failure
        let result = engine.consume_act_one(&hex::decode(ACT_ONE).unwrap());
        assert_eq!(
            result,
            Err(ChannelError::ProtocolOutOfOrder { operation: "consume act one", state: "Failed" })
        );
    }

    #[test]
    fn transport_before_completion_is_not_ready() {
        let mut engine = initiator_after_act_one();
        assert_eq!(engine.encrypt(b"early"), Err(ChannelError::NotReady));
        assert!(engine.handshake_hash().is_none());
        assert!(engine.cipher().is_none());
    }

    #[test]
    fn into_cipher_after_completion() {
        let mut engine = responder_after_act_two();
        engine.consume_act_three(&hex::decode(ACT_THREE).unwrap()).unwrap();

        let cipher = engine.into_cipher().unwrap();
        assert_eq!(cipher.send_nonce(), 0);
        assert_eq!(cipher.recv_nonce(), 0);
    }
}
