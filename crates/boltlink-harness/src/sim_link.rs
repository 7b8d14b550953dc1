//! In-memory duplex link between two secure channels.
//!
//! `SimLink` plays the driver for both ends of a connection: it executes
//! every [`ChannelAction`], moves bytes between the two sides through FIFO
//! queues and records what each application would have observed.
//!
//! # Faults
//!
//! - Fragmentation: deliveries are cut into seeded chunks of at most
//!   `max_chunk` bytes
//! - Tampering: a bit can be flipped at any absolute offset of either
//!   direction's byte stream
//!
//! # Consumers
//!
//! With `auto_read` on, a side drains its inbox whenever it becomes readable
//! and immediately asks for more. With it off, the test reads explicitly and
//! backpressure builds up in the channel.

use std::collections::VecDeque;

use boltlink_core::{ChannelAction, ChannelConfig, ChannelError, Environment, SecureChannel};
use boltlink_crypto::{KeyPair, PublicKey};
use bytes::Bytes;

use crate::sim_env::SimEnv;

/// Safety valve for `run_until_idle`.
const MAX_STEPS: usize = 1_000_000;

/// One end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The connecting side
    Initiator,
    /// The accepting side
    Responder,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Self::Initiator => 0,
            Self::Responder => 1,
        }
    }

    /// The other end.
    pub fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

/// What one side's application observed.
#[derive(Debug, Clone, Default)]
pub struct SideLog {
    /// Authenticated peer key from `Connected`
    pub connected: Option<PublicKey>,
    /// Messages read by the consumer, in order
    pub received: Vec<Bytes>,
    /// `Some(error)` once `Close` was emitted
    pub closed: Option<Option<ChannelError>>,
    /// Number of `Readable` actions
    pub readable_count: usize,
    /// Number of `ScheduleResume` continuations executed
    pub resume_count: usize,
}

impl SideLog {
    /// The error the side closed with, if it closed with one.
    pub fn close_error(&self) -> Option<&ChannelError> {
        self.closed.as_ref().and_then(Option::as_ref)
    }
}

/// Per-side driver state.
struct Endpoint {
    channel: SecureChannel,
    log: SideLog,
    auto_read: bool,
    /// Bytes queued toward this side
    inbound: VecDeque<u8>,
    /// Bytes delivered to this side so far
    delivered: usize,
    /// Absolute inbound offsets to corrupt
    tamper: Vec<(usize, u8)>,
    /// This side closed its transport
    transport_closed: bool,
    /// This side was told the peer's transport closed
    eof_delivered: bool,
}

impl Endpoint {
    fn new(channel: SecureChannel) -> Self {
        Self {
            channel,
            log: SideLog::default(),
            auto_read: true,
            inbound: VecDeque::new(),
            delivered: 0,
            tamper: Vec::new(),
            transport_closed: false,
            eof_delivered: false,
        }
    }
}

/// Two channels joined by an in-memory transport.
pub struct SimLink {
    env: SimEnv,
    endpoints: [Endpoint; 2],
    /// Pending `ScheduleResume` continuations, run in FIFO order
    resumes: VecDeque<Side>,
    max_chunk: Option<usize>,
    /// Side to deliver to next, alternated for fairness
    turn: Side,
}

impl SimLink {
    /// Create a link with statics and ephemerals drawn from a seeded
    /// environment.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration` if the seeded stream yields no valid scalar
    pub fn new(seed: u64, config: ChannelConfig) -> Result<Self, ChannelError> {
        let env = SimEnv::with_seed(seed);
        let initiator_static = env.generate_keypair().map_err(ChannelError::KeyGeneration)?;
        let responder_static = env.generate_keypair().map_err(ChannelError::KeyGeneration)?;
        Self::with_statics(env, initiator_static, responder_static, config)
    }

    /// Create a link between the given identities.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration` if the environment yields no valid ephemeral scalar
    pub fn with_statics(
        env: SimEnv,
        initiator_static: KeyPair,
        responder_static: KeyPair,
        config: ChannelConfig,
    ) -> Result<Self, ChannelError> {
        let remote_static = responder_static.public_key();
        let responder = SecureChannel::attach_as_responder(responder_static, &env, config.clone())?;
        let (initiator, actions) =
            SecureChannel::connect_as_initiator(initiator_static, remote_static, &env, config)?;

        let mut link = Self {
            env,
            endpoints: [Endpoint::new(initiator), Endpoint::new(responder)],
            resumes: VecDeque::new(),
            max_chunk: None,
            turn: Side::Responder,
        };
        link.execute(Side::Initiator, actions);
        Ok(link)
    }

    /// Cut deliveries into chunks of at most `max_chunk` bytes.
    pub fn set_max_chunk(&mut self, max_chunk: Option<usize>) {
        self.max_chunk = max_chunk;
    }

    /// Switch a side between draining automatically and explicit reads.
    pub fn set_auto_read(&mut self, side: Side, auto_read: bool) {
        self.endpoints[side.index()].auto_read = auto_read;
    }

    /// Flip `mask` bits of the byte at `offset` in the stream toward `side`.
    ///
    /// Offsets are absolute from the start of the connection, handshake
    /// included. Bytes already delivered are unaffected.
    pub fn corrupt(&mut self, toward: Side, offset: usize, mask: u8) {
        self.endpoints[toward.index()].tamper.push((offset, mask));
    }

    /// Bytes delivered to `side` so far.
    pub fn delivered(&self, side: Side) -> usize {
        self.endpoints[side.index()].delivered
    }

    /// Bytes queued toward `side`.
    pub fn in_flight(&self, side: Side) -> usize {
        self.endpoints[side.index()].inbound.len()
    }

    /// What `side` has observed.
    pub fn log(&self, side: Side) -> &SideLog {
        &self.endpoints[side.index()].log
    }

    /// The channel of `side`.
    pub fn channel(&self, side: Side) -> &SecureChannel {
        &self.endpoints[side.index()].channel
    }

    /// Write one message from `side`.
    ///
    /// # Errors
    ///
    /// Whatever [`SecureChannel::write`] rejects.
    pub fn write(&mut self, side: Side, plaintext: &[u8]) -> Result<(), ChannelError> {
        let actions = self.endpoints[side.index()].channel.write(plaintext)?;
        self.execute(side, actions);
        Ok(())
    }

    /// Read one message as a manual consumer.
    pub fn read(&mut self, side: Side) -> Option<Bytes> {
        let endpoint = &mut self.endpoints[side.index()];
        let message = endpoint.channel.read()?;
        endpoint.log.received.push(message.clone());
        Some(message)
    }

    /// Tell `side`'s channel that the consumer wants more.
    pub fn request_more(&mut self, side: Side) {
        let actions = self.endpoints[side.index()].channel.request_more();
        self.execute(side, actions);
    }

    /// Gracefully end `side`.
    pub fn end(&mut self, side: Side) {
        let actions = self.endpoints[side.index()].channel.end();
        self.execute(side, actions);
    }

    /// Deliver one chunk, or run one pending continuation.
    ///
    /// Returns false when nothing is left to do.
    pub fn step(&mut self) -> bool {
        if let Some(side) = self.resumes.pop_front() {
            self.endpoints[side.index()].log.resume_count += 1;
            let actions = self.endpoints[side.index()].channel.resume();
            self.execute(side, actions);
            return true;
        }

        for _ in 0..2 {
            let side = self.turn;
            self.turn = side.peer();
            if self.deliver_to(side) {
                return true;
            }
        }
        false
    }

    /// Step until idle. Returns the number of steps taken.
    pub fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        while steps < MAX_STEPS && self.step() {
            steps += 1;
        }
        if steps == MAX_STEPS {
            tracing::warn!(steps, "simulation did not go idle");
        }
        steps
    }

    fn deliver_to(&mut self, side: Side) -> bool {
        let peer_closed = self.endpoints[side.peer().index()].transport_closed;
        let endpoint = &mut self.endpoints[side.index()];

        if endpoint.transport_closed {
            endpoint.inbound.clear();
            return false;
        }

        if endpoint.inbound.is_empty() {
            if peer_closed && !endpoint.eof_delivered {
                endpoint.eof_delivered = true;
                let actions = endpoint.channel.handle_transport_closed();
                self.execute(side, actions);
                return true;
            }
            return false;
        }

        // Stop feeding a blocked channel, like a driver that stops reading
        if endpoint.channel.is_blocked() {
            return false;
        }

        let size = match self.max_chunk {
            Some(max) => self.env.chunk_size(max).min(endpoint.inbound.len()),
            None => endpoint.inbound.len(),
        };

        let start = endpoint.delivered;
        let mut chunk: Vec<u8> = endpoint.inbound.drain(..size).collect();
        for &(offset, mask) in &endpoint.tamper {
            if (start..start + size).contains(&offset) {
                chunk[offset - start] ^= mask;
            }
        }
        endpoint.delivered += size;

        let actions = endpoint.channel.handle_data(&chunk);
        self.execute(side, actions);
        true
    }

    fn execute(&mut self, side: Side, actions: Vec<ChannelAction>) {
        let mut queue: VecDeque<ChannelAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                ChannelAction::Send(bytes) => {
                    if !self.endpoints[side.index()].transport_closed {
                        self.endpoints[side.peer().index()].inbound.extend(bytes.iter().copied());
                    }
                },
                ChannelAction::Connected { remote_static } => {
                    tracing::debug!(?side, "connected");
                    self.endpoints[side.index()].log.connected = Some(remote_static);
                },
                ChannelAction::Readable => {
                    let endpoint = &mut self.endpoints[side.index()];
                    endpoint.log.readable_count += 1;
                    if endpoint.auto_read {
                        while let Some(message) = endpoint.channel.read() {
                            endpoint.log.received.push(message);
                        }
                        queue.extend(endpoint.channel.request_more());
                    }
                },
                ChannelAction::ScheduleResume => self.resumes.push_back(side),
                ChannelAction::Close { error } => {
                    tracing::debug!(?side, ?error, "closed");
                    let endpoint = &mut self.endpoints[side.index()];
                    endpoint.log.closed = Some(error);
                    endpoint.transport_closed = true;
                },
            }
        }
    }
}
