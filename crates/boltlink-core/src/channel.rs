//! Secure channel state machine.
//!
//! Wraps a [`HandshakeEngine`] with framing, buffering and flow control.
//! Uses the action pattern: methods take bytes as input and return actions
//! for the driver to execute. This keeps the state machine pure (no I/O) and
//! makes testing straightforward.
//!
//! # Handshake States
//!
//! ```text
//! Initiator:
//! ┌──────────────┐ act one ┌────────────────────────┐ act two/three ┌───────┐
//! │ Initiating   │────────>│ AwaitingResponderReply │──────────────>│ Ready │
//! └──────────────┘         └────────────────────────┘               └───────┘
//!
//! Responder:
//! ┌────────────────────┐ act one/two ┌────────────────────────┐ act three ┌───────┐
//! │ AwaitingInitiator  │────────────>│ AwaitingInitiatorReply │──────────>│ Ready │
//! └────────────────────┘             └────────────────────────┘           └───────┘
//! ```
//!
//! # Read States (Ready only)
//!
//! ```text
//! ┌────────────────┐ 18 bytes ┌────────────────┐ len+16 bytes ┌─────────┐
//! │ ReadyForLength │─────────>│ ReadyForBody   │─────────────>│ deliver │
//! └────────────────┘          └────────────────┘              └─────────┘
//!         ↑                                                     │     │
//!         └──────────────── inbox below high water ─────────────┘     │
//!                                                                     ↓
//!                           request_more()                      ┌─────────┐
//!         ReadyForLength <──────────────────────────────────────│ Blocked │
//!                                                               └─────────┘
//! ```
//!
//! Any error terminates the channel: buffered bytes are discarded and a
//! single `Close` action carries the error.

use std::collections::VecDeque;

use boltlink_crypto::{KeyPair, MAC_SIZE, PublicKey};
use bytes::{Buf, Bytes, BytesMut};

use crate::{
    cipher::ENCRYPTED_LENGTH_SIZE,
    env::Environment,
    error::ChannelError,
    handshake::{ACT_ONE_SIZE, ACT_THREE_SIZE, ACT_TWO_SIZE, HandshakeEngine, Role},
};

/// Decrypted messages queued before the channel stops decrypting.
pub const DEFAULT_INBOX_HIGH_WATER: usize = 16;

/// Actions returned by the channel state machine.
///
/// The driver (test harness or production runtime) executes these actions:
/// - `Send`: Write the bytes to the transport, in order
/// - `Connected`: Report the authenticated peer to the application
/// - `Readable`: Wake the application, messages are waiting in the inbox
/// - `ScheduleResume`: Call [`SecureChannel::resume`] on a later turn
/// - `Close`: Close the transport, reporting the error if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    /// Write these bytes to the transport
    Send(Bytes),

    /// Handshake completed
    Connected {
        /// The peer's authenticated static key
        remote_static: PublicKey,
    },

    /// Inbox went from empty to non-empty
    Readable,

    /// Decryption was unblocked; resume on a later turn
    ScheduleResume,

    /// Close the transport
    Close {
        /// `None` for a graceful close
        error: Option<ChannelError>,
    },
}

/// Handshake progress of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Initiator before act one is produced
    InitiatorInitiating,
    /// Initiator waiting for act two
    AwaitingResponderReply,
    /// Responder waiting for act one
    AwaitingInitiator,
    /// Responder waiting for act three
    AwaitingInitiatorReply,
    /// Transport keys derived
    Ready,
}

impl HandshakeState {
    /// Stable label for logs and errors.
    pub fn label(self) -> &'static str {
        match self {
            Self::InitiatorInitiating => "InitiatorInitiating",
            Self::AwaitingResponderReply => "AwaitingResponderReply",
            Self::AwaitingInitiator => "AwaitingInitiator",
            Self::AwaitingInitiatorReply => "AwaitingInitiatorReply",
            Self::Ready => "Ready",
        }
    }
}

/// Packet reader progress once `Ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Waiting for an 18-byte encrypted length
    ReadyForLength,
    /// Length decrypted, waiting for `length + 16` body bytes
    ReadyForBody {
        /// Plaintext length of the pending body
        length: u16,
    },
    /// Inbox at high water; decryption paused until `request_more`
    Blocked,
}

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Inbox length at which decryption blocks (minimum 1)
    pub inbox_high_water: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { inbox_high_water: DEFAULT_INBOX_HIGH_WATER }
    }
}

/// Secure channel state machine
///
/// Owns one connection's handshake, cipher, receive buffer and inbox.
///
/// This is a pure state machine - no I/O. Randomness comes from the
/// [`Environment`] at construction; everything after is deterministic in the
/// bytes fed to it.
#[derive(Debug)]
pub struct SecureChannel {
    engine: HandshakeEngine,
    handshake: HandshakeState,
    read_state: ReadState,
    /// Responder's act-two key, generated up front
    pending_ephemeral: Option<KeyPair>,
    buffer: BytesMut,
    inbox: VecDeque<Bytes>,
    config: ChannelConfig,
    closed: bool,
    resume_scheduled: bool,
    messages_received: u64,
    messages_sent: u64,
}

impl SecureChannel {
    fn new(
        engine: HandshakeEngine,
        handshake: HandshakeState,
        pending_ephemeral: Option<KeyPair>,
        mut config: ChannelConfig,
    ) -> Self {
        config.inbox_high_water = config.inbox_high_water.max(1);
        Self {
            engine,
            handshake,
            read_state: ReadState::ReadyForLength,
            pending_ephemeral,
            buffer: BytesMut::new(),
            inbox: VecDeque::new(),
            config,
            closed: false,
            resume_scheduled: false,
            messages_received: 0,
            messages_sent: 0,
        }
    }

    /// Start a connection to `remote_static` (initiator).
    ///
    /// Returns the channel and its first actions: `Send(act one)`.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration` if the environment cannot produce an ephemeral key
    pub fn connect_as_initiator<E: Environment>(
        local_static: KeyPair,
        remote_static: PublicKey,
        env: &E,
        config: ChannelConfig,
    ) -> Result<(Self, Vec<ChannelAction>), ChannelError> {
        let ephemeral = env.generate_keypair().map_err(ChannelError::KeyGeneration)?;
        Ok(Self::initiator_with_ephemeral(local_static, remote_static, ephemeral, config))
    }

    /// Start a connection with a caller-chosen ephemeral key.
    ///
    /// Used for reproducing fixed handshake transcripts.
    pub fn initiator_with_ephemeral(
        local_static: KeyPair,
        remote_static: PublicKey,
        ephemeral: KeyPair,
        config: ChannelConfig,
    ) -> (Self, Vec<ChannelAction>) {
        let engine = HandshakeEngine::initiator(local_static, remote_static);
        let mut channel = Self::new(engine, HandshakeState::InitiatorInitiating, None, config);
        let mut actions = Vec::new();

        match channel.engine.produce_act_one(ephemeral) {
            Ok(act_one) => {
                actions.push(ChannelAction::Send(Bytes::copy_from_slice(&act_one)));
                channel.transition(HandshakeState::AwaitingResponderReply);
            },
            Err(error) => channel.terminate_into(Some(error), &mut actions),
        }

        (channel, actions)
    }

    /// Accept an inbound connection (responder).
    ///
    /// Produces no actions until act one arrives via [`Self::handle_data`].
    ///
    /// # Errors
    ///
    /// - `KeyGeneration` if the environment cannot produce an ephemeral key
    pub fn attach_as_responder<E: Environment>(
        local_static: KeyPair,
        env: &E,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError> {
        let ephemeral = env.generate_keypair().map_err(ChannelError::KeyGeneration)?;
        Ok(Self::responder_with_ephemeral(local_static, ephemeral, config))
    }

    /// Accept an inbound connection with a caller-chosen ephemeral key.
    pub fn responder_with_ephemeral(local_static: KeyPair, ephemeral: KeyPair, config: ChannelConfig) -> Self {
        let engine = HandshakeEngine::responder(local_static);
        Self::new(engine, HandshakeState::AwaitingInitiator, Some(ephemeral), config)
    }

    /// Current handshake state
    #[must_use]
    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake
    }

    /// Current packet reader state
    #[must_use]
    pub fn read_state(&self) -> ReadState {
        self.read_state
    }

    /// Role of this side
    #[must_use]
    pub fn role(&self) -> Role {
        self.engine.role()
    }

    /// True once the handshake completed and the channel is still open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.handshake == HandshakeState::Ready && !self.closed
    }

    /// True after `Close` has been emitted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True while decryption is paused on a full inbox.
    ///
    /// Drivers stop reading from the transport while blocked.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.read_state == ReadState::Blocked
    }

    /// True if the inbox holds undelivered messages.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Number of messages waiting in the inbox.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inbox.len()
    }

    /// Received bytes not yet consumed by the handshake or packet reader.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// The peer's static key, once known.
    #[must_use]
    pub fn remote_static(&self) -> Option<PublicKey> {
        self.engine.remote_static()
    }

    /// Final handshake hash, once `Ready`.
    #[must_use]
    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        self.engine.handshake_hash()
    }

    /// Messages decrypted so far.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Messages encrypted so far.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Feed bytes received from the transport.
    ///
    /// Bytes may arrive in arbitrary fragments; they are buffered and
    /// consumed as complete acts or packets become available. Data after
    /// close is ignored.
    pub fn handle_data(&mut self, data: &[u8]) -> Vec<ChannelAction> {
        let mut actions = Vec::new();
        if self.closed {
            return actions;
        }

        if self.handshake == HandshakeState::InitiatorInitiating {
            let error = ChannelError::ProtocolOutOfOrder {
                operation: "handle data",
                state: self.handshake.label(),
            };
            self.terminate_into(Some(error), &mut actions);
            return actions;
        }

        self.buffer.extend_from_slice(data);
        self.process(&mut actions);
        actions
    }

    /// Encrypt and send one message.
    ///
    /// # Errors
    ///
    /// - `Closed` after the channel terminated
    /// - `NotReady` before the handshake completed
    /// - `MessageTooLarge` above 65535 bytes
    pub fn write(&mut self, plaintext: &[u8]) -> Result<Vec<ChannelAction>, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if self.handshake != HandshakeState::Ready {
            return Err(ChannelError::NotReady);
        }

        let packet = self.engine.encrypt(plaintext)?;
        self.messages_sent += 1;

        Ok(vec![ChannelAction::Send(Bytes::from(packet))])
    }

    /// Take the oldest decrypted message.
    pub fn read(&mut self) -> Option<Bytes> {
        self.inbox.pop_front()
    }

    /// Signal that the application consumed the inbox and wants more.
    ///
    /// Unblocks decryption if it was paused. Returns `ScheduleResume` at
    /// most once until [`Self::resume`] runs.
    pub fn request_more(&mut self) -> Vec<ChannelAction> {
        if self.closed || self.read_state != ReadState::Blocked {
            return Vec::new();
        }

        self.read_state = ReadState::ReadyForLength;
        if self.resume_scheduled {
            return Vec::new();
        }

        self.resume_scheduled = true;
        vec![ChannelAction::ScheduleResume]
    }

    /// Continue processing buffered bytes after `ScheduleResume`.
    pub fn resume(&mut self) -> Vec<ChannelAction> {
        self.resume_scheduled = false;

        let mut actions = Vec::new();
        if !self.closed {
            self.process(&mut actions);
        }
        actions
    }

    /// Graceful close requested by the application.
    pub fn end(&mut self) -> Vec<ChannelAction> {
        tracing::debug!(state = self.handshake.label(), "channel ended by application");
        self.terminate(None)
    }

    /// Terminate the channel. Idempotent: only the first call emits `Close`.
    pub fn terminate(&mut self, error: Option<ChannelError>) -> Vec<ChannelAction> {
        let mut actions = Vec::new();
        self.terminate_into(error, &mut actions);
        actions
    }

    /// The transport reached end of stream.
    ///
    /// Graceful once `Ready`, a transport error during the handshake.
    pub fn handle_transport_closed(&mut self) -> Vec<ChannelAction> {
        let error = (self.handshake != HandshakeState::Ready)
            .then(|| ChannelError::Transport("connection closed during handshake".to_string()));
        self.terminate(error)
    }

    /// The transport failed.
    pub fn handle_transport_error(&mut self, reason: impl Into<String>) -> Vec<ChannelAction> {
        self.terminate(Some(ChannelError::Transport(reason.into())))
    }

    fn process(&mut self, actions: &mut Vec<ChannelAction>) {
        while !self.closed {
            let progressed = match self.handshake {
                HandshakeState::InitiatorInitiating => false,
                HandshakeState::AwaitingInitiator => self.read_act_one(actions),
                HandshakeState::AwaitingResponderReply => self.read_act_two(actions),
                HandshakeState::AwaitingInitiatorReply => self.read_act_three(actions),
                HandshakeState::Ready => {
                    self.read_packets(actions);
                    false
                },
            };

            if !progressed {
                break;
            }
        }
    }

    fn read_act_one(&mut self, actions: &mut Vec<ChannelAction>) -> bool {
        if self.buffer.len() < ACT_ONE_SIZE {
            return false;
        }

        let act_one = self.buffer.split_to(ACT_ONE_SIZE);
        match self.answer_act_one(&act_one) {
            Ok(act_two) => {
                actions.push(ChannelAction::Send(Bytes::copy_from_slice(&act_two)));
                self.transition(HandshakeState::AwaitingInitiatorReply);
                true
            },
            Err(error) => {
                self.terminate_into(Some(error), actions);
                false
            },
        }
    }

    fn answer_act_one(&mut self, act_one: &[u8]) -> Result<[u8; ACT_TWO_SIZE], ChannelError> {
        self.engine.consume_act_one(act_one)?;

        let ephemeral = self.pending_ephemeral.take().ok_or(ChannelError::ProtocolOutOfOrder {
            operation: "produce act two",
            state: self.handshake.label(),
        })?;
        self.engine.produce_act_two(ephemeral)
    }

    fn read_act_two(&mut self, actions: &mut Vec<ChannelAction>) -> bool {
        if self.buffer.len() < ACT_TWO_SIZE {
            return false;
        }

        let act_two = self.buffer.split_to(ACT_TWO_SIZE);
        match self.answer_act_two(&act_two) {
            Ok((act_three, remote_static)) => {
                actions.push(ChannelAction::Send(Bytes::copy_from_slice(&act_three)));
                self.become_ready(remote_static, actions);
                true
            },
            Err(error) => {
                self.terminate_into(Some(error), actions);
                false
            },
        }
    }

    fn answer_act_two(&mut self, act_two: &[u8]) -> Result<([u8; ACT_THREE_SIZE], PublicKey), ChannelError> {
        self.engine.consume_act_two(act_two)?;
        let act_three = self.engine.produce_act_three()?;

        let remote_static = self.engine.remote_static().ok_or(ChannelError::ProtocolOutOfOrder {
            operation: "report remote static",
            state: self.handshake.label(),
        })?;
        Ok((act_three, remote_static))
    }

    fn read_act_three(&mut self, actions: &mut Vec<ChannelAction>) -> bool {
        if self.buffer.len() < ACT_THREE_SIZE {
            return false;
        }

        let act_three = self.buffer.split_to(ACT_THREE_SIZE);
        match self.engine.consume_act_three(&act_three) {
            Ok(remote_static) => {
                self.become_ready(remote_static, actions);
                true
            },
            Err(error) => {
                self.terminate_into(Some(error), actions);
                false
            },
        }
    }

    fn become_ready(&mut self, remote_static: PublicKey, actions: &mut Vec<ChannelAction>) {
        self.transition(HandshakeState::Ready);
        self.read_state = ReadState::ReadyForLength;
        actions.push(ChannelAction::Connected { remote_static });
    }

    fn read_packets(&mut self, actions: &mut Vec<ChannelAction>) {
        while !self.closed {
            match self.read_state {
                ReadState::ReadyForLength => {
                    if self.buffer.len() < ENCRYPTED_LENGTH_SIZE {
                        return;
                    }

                    let mut header = [0u8; ENCRYPTED_LENGTH_SIZE];
                    self.buffer.copy_to_slice(&mut header);

                    match self.engine.decrypt_length(&header) {
                        Ok(length) => self.read_state = ReadState::ReadyForBody { length },
                        Err(error) => {
                            self.terminate_into(Some(error), actions);
                            return;
                        },
                    }
                },
                ReadState::ReadyForBody { length } => {
                    let needed = usize::from(length) + MAC_SIZE;
                    if self.buffer.len() < needed {
                        return;
                    }

                    let body = self.buffer.split_to(needed);
                    match self.engine.decrypt_message(&body) {
                        Ok(plaintext) => {
                            self.messages_received += 1;
                            let accepting = self.deliver(Bytes::from(plaintext), actions);
                            self.read_state =
                                if accepting { ReadState::ReadyForLength } else { ReadState::Blocked };
                            if !accepting {
                                tracing::trace!(pending = self.inbox.len(), "inbox full, decryption blocked");
                            }
                        },
                        Err(error) => {
                            self.terminate_into(Some(error), actions);
                            return;
                        },
                    }
                },
                ReadState::Blocked => return,
            }
        }
    }

    /// Queue a message. Returns whether the inbox is still below high water.
    fn deliver(&mut self, message: Bytes, actions: &mut Vec<ChannelAction>) -> bool {
        let was_empty = self.inbox.is_empty();
        self.inbox.push_back(message);
        if was_empty {
            actions.push(ChannelAction::Readable);
        }
        self.inbox.len() < self.config.inbox_high_water
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!(from = self.handshake.label(), to = next.label(), "handshake transition");
        self.handshake = next;
    }

    fn terminate_into(&mut self, error: Option<ChannelError>, actions: &mut Vec<ChannelAction>) {
        if self.closed {
            return;
        }

        self.closed = true;
        self.buffer.clear();
        self.pending_ephemeral = None;

        match &error {
            Some(error) if error.is_protocol_violation() => {
                tracing::warn!(%error, state = self.handshake.label(), "channel terminated by protocol violation");
            },
            Some(error) => {
                tracing::debug!(%error, state = self.handshake.label(), "channel terminated");
            },
            None => tracing::debug!(state = self.handshake.label(), "channel closed"),
        }

        actions.push(ChannelAction::Close { error });
    }
}
