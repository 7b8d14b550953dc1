//! Secure stream runtime.
//!
//! Runs a [`SecureChannel`] over any tokio `AsyncRead + AsyncWrite`
//! transport. The channel stays sans-IO; this module only executes its
//! actions.
//!
//! # Tasks
//!
//! ```text
//!              commands (unbounded)
//! SecureStream ────────────────────> driver task ──── packets ───> writer task ──> transport
//!      ^                                 │   ^                          │
//!      │       events (bounded)          │   │      write failures      │
//!      └─────────────────────────────────┘   └──────────────────────────┘
//!                                        ^
//!                                        └──────── reads ─── transport
//! ```
//!
//! # Backpressure
//!
//! - Inbound: decrypted messages move from the channel inbox into the
//!   bounded event queue only as permits become available. When the inbox
//!   reaches high water the channel blocks and the driver stops reading the
//!   transport, so the peer sees TCP backpressure.
//! - Outbound: `write` counts queued wire bytes and returns false at the
//!   configured high-water mark; `drained` resolves once they are flushed.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use boltlink_core::{
    ChannelAction, ChannelError, ENCRYPTED_LENGTH_SIZE, MAX_MESSAGE_SIZE, Role, SecureChannel,
};
use boltlink_crypto::{KeyPair, MAC_SIZE, PublicKey};
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Notify, mpsc},
};
use tracing::Instrument;

use crate::{config::StreamConfig, error::StreamError, system_env::SystemEnv};

/// Wire bytes added to every plaintext.
const PACKET_OVERHEAD: usize = ENCRYPTED_LENGTH_SIZE + MAC_SIZE;

/// Source of connection ids for log spans.
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Events delivered to the stream consumer, in order.
///
/// `Connected` precedes every `Message`. Exactly one of `Closed` or `Error`
/// ends the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Handshake completed with this authenticated peer
    Connected {
        /// Peer's static key
        remote_static: PublicKey,
    },
    /// One decrypted message
    Message(Bytes),
    /// Graceful close
    Closed,
    /// Fatal error; the transport is already closed
    Error(ChannelError),
}

/// Consumer-to-driver requests.
#[derive(Debug)]
enum Command {
    Write(Bytes),
    End,
}

/// Driver-to-writer requests.
#[derive(Debug)]
enum Outbound {
    /// Bytes to write; `counted` bytes are released from the backlog once
    /// written
    Wire { bytes: Bytes, counted: usize },
    Shutdown,
}

/// State visible to both the consumer handle and the tasks.
#[derive(Debug, Default)]
struct Shared {
    queued: AtomicUsize,
    drained: Notify,
    ready: AtomicBool,
    closed: AtomicBool,
    /// Writer task finished and shut the write half down
    flushed: AtomicBool,
}

impl Shared {
    fn release(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let previous = self.queued.fetch_sub(bytes, Ordering::AcqRel);
        if previous == bytes {
            self.drained.notify_waiters();
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.drained.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_flushed(&self) {
        self.flushed.store(true, Ordering::Release);
        self.drained.notify_waiters();
    }
}

/// Consumer handle to an encrypted, authenticated stream.
///
/// Created by [`SecureStream::initiator`], [`SecureStream::responder`] or
/// the TCP helpers. The handshake runs in a background task; await
/// [`SecureStream::connected`] before writing.
#[derive(Debug)]
pub struct SecureStream {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::Receiver<StreamEvent>,
    shared: Arc<Shared>,
    remote_static: Option<PublicKey>,
    write_high_water: usize,
}

impl SecureStream {
    /// Connect to `remote_static` over `io`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Channel(KeyGeneration)` if no ephemeral key could be drawn
    pub fn initiator<S>(
        io: S,
        local_static: KeyPair,
        remote_static: PublicKey,
        config: StreamConfig,
    ) -> Result<Self, StreamError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (channel, actions) = SecureChannel::connect_as_initiator(
            local_static,
            remote_static,
            &SystemEnv::new(),
            config.channel.clone(),
        )?;
        Ok(Self::from_channel(io, channel, actions, config))
    }

    /// Accept a connection over `io`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `Channel(KeyGeneration)` if no ephemeral key could be drawn
    pub fn responder<S>(io: S, local_static: KeyPair, config: StreamConfig) -> Result<Self, StreamError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let channel =
            SecureChannel::attach_as_responder(local_static, &SystemEnv::new(), config.channel.clone())?;
        Ok(Self::from_channel(io, channel, Vec::new(), config))
    }

    /// Drive an already-constructed channel over `io`.
    ///
    /// `initial` are the actions returned by the channel's constructor.
    /// Used to run channels built from a seeded environment.
    pub fn from_channel<S>(
        io: S,
        channel: SecureChannel,
        initial: Vec<ChannelAction>,
        config: StreamConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let role = match channel.role() {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        };
        let span = tracing::info_span!("stream", id, role);

        tokio::spawn(
            write_loop(writer, outbound_rx, failure_tx, Arc::clone(&shared)).instrument(span.clone()),
        );

        let driver = Driver {
            channel,
            outbound: outbound_tx,
            events: event_tx,
            shared: Arc::clone(&shared),
            resume_pending: false,
            finished: false,
        };
        tokio::spawn(driver.run(reader, initial, command_rx, failure_rx, config.clone()).instrument(span));

        Self {
            commands: command_tx,
            events: event_rx,
            shared,
            remote_static: None,
            write_high_water: config.write_high_water,
        }
    }

    /// Next event from the driver. `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.events.recv().await;
        if let Some(StreamEvent::Connected { remote_static }) = &event {
            self.remote_static = Some(*remote_static);
        }
        event
    }

    /// Wait for the handshake to complete.
    ///
    /// Returns immediately if `Connected` was already observed.
    ///
    /// # Errors
    ///
    /// - `Channel(err)` if the handshake failed
    /// - `Closed` if the stream closed first
    pub async fn connected(&mut self) -> Result<PublicKey, StreamError> {
        if let Some(remote_static) = self.remote_static {
            return Ok(remote_static);
        }

        loop {
            match self.next_event().await {
                Some(StreamEvent::Connected { remote_static }) => return Ok(remote_static),
                Some(StreamEvent::Error(err)) => return Err(StreamError::Channel(err)),
                Some(StreamEvent::Message(_)) => {
                    tracing::warn!("message before connected, dropping");
                },
                Some(StreamEvent::Closed) | None => return Err(StreamError::Closed),
            }
        }
    }

    /// Next decrypted message. `Ok(None)` on graceful close.
    ///
    /// # Errors
    ///
    /// - `Channel(err)` if the connection failed
    pub async fn recv(&mut self) -> Result<Option<Bytes>, StreamError> {
        loop {
            match self.next_event().await {
                Some(StreamEvent::Message(message)) => return Ok(Some(message)),
                Some(StreamEvent::Connected { .. }) => {},
                Some(StreamEvent::Error(err)) => return Err(StreamError::Channel(err)),
                Some(StreamEvent::Closed) | None => return Ok(None),
            }
        }
    }

    /// Queue one message for encryption.
    ///
    /// Returns `Ok(false)` once the outbound backlog reaches the high-water
    /// mark; the message is still queued, but the caller should await
    /// [`Self::drained`] before writing more.
    ///
    /// # Errors
    ///
    /// - `Channel(NotReady)` before the handshake completed
    /// - `Channel(MessageTooLarge)` above 65535 bytes
    /// - `Closed` after the stream closed
    pub fn write(&self, plaintext: impl Into<Bytes>) -> Result<bool, StreamError> {
        let plaintext = plaintext.into();

        if self.shared.is_closed() {
            return Err(StreamError::Closed);
        }
        if !self.shared.ready.load(Ordering::Acquire) {
            return Err(ChannelError::NotReady.into());
        }
        if plaintext.len() > MAX_MESSAGE_SIZE {
            return Err(ChannelError::MessageTooLarge { size: plaintext.len(), max: MAX_MESSAGE_SIZE }.into());
        }

        let wire_size = plaintext.len() + PACKET_OVERHEAD;
        let queued = self.shared.queued.fetch_add(wire_size, Ordering::AcqRel) + wire_size;

        if self.commands.send(Command::Write(plaintext)).is_err() {
            self.shared.release(wire_size);
            return Err(StreamError::Closed);
        }

        Ok(queued < self.write_high_water)
    }

    /// Resolve once every queued write reached the transport, or the stream
    /// closed.
    pub async fn drained(&self) {
        loop {
            let notified = self.shared.drained.notified();
            if self.shared.queued.load(Ordering::Acquire) == 0 || self.shared.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Outbound wire bytes not yet written to the transport.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Request a graceful close once queued writes are flushed.
    pub fn end(&self) {
        let _ = self.commands.send(Command::End);
    }

    /// End the stream and wait until the transport is shut down.
    ///
    /// Inbound messages still pending are discarded. Call this before the
    /// runtime exits so queued writes reach the peer.
    ///
    /// # Errors
    ///
    /// - `Channel(err)` if the connection failed before it could close
    pub async fn close(&mut self) -> Result<(), StreamError> {
        self.end();

        let mut result = Ok(());
        while let Some(event) = self.next_event().await {
            if let StreamEvent::Error(err) = event {
                result = Err(StreamError::Channel(err));
            }
        }

        loop {
            let notified = self.shared.drained.notified();
            if self.shared.flushed.load(Ordering::Acquire) {
                return result;
            }
            notified.await;
        }
    }

    /// Peer's static key, once `Connected` was observed.
    pub fn remote_static(&self) -> Option<PublicKey> {
        self.remote_static
    }

    /// True once the stream reached a terminal state.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Owns the channel and executes its actions.
struct Driver {
    channel: SecureChannel,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::Sender<StreamEvent>,
    shared: Arc<Shared>,
    resume_pending: bool,
    finished: bool,
}

impl Driver {
    async fn run<R>(
        mut self,
        mut reader: ReadHalf<R>,
        initial: Vec<ChannelAction>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut failures: mpsc::UnboundedReceiver<String>,
        config: StreamConfig,
    ) where
        R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.execute(initial).await;

        let deadline = tokio::time::sleep(config.handshake_timeout);
        tokio::pin!(deadline);

        let mut buf = vec![0u8; config.read_buffer_size.max(1)];
        let mut commands_open = true;

        while !self.finished {
            if self.resume_pending {
                tokio::task::yield_now().await;
                self.resume_pending = false;
                let actions = self.channel.resume();
                self.execute(actions).await;
                continue;
            }

            let handshaking = !self.channel.is_ready();
            let forwarding = self.channel.has_pending();
            let reading = !self.channel.is_blocked();

            tokio::select! {
                permit = self.events.clone().reserve_owned(), if forwarding => match permit {
                    Ok(permit) => {
                        if let Some(message) = self.channel.read() {
                            permit.send(StreamEvent::Message(message));
                        }
                        if !self.channel.has_pending() {
                            let actions = self.channel.request_more();
                            self.execute(actions).await;
                        }
                    },
                    Err(_) => {
                        tracing::debug!("consumer dropped");
                        let actions = self.channel.end();
                        self.execute(actions).await;
                    },
                },

                () = &mut deadline, if handshaking => {
                    let error = ChannelError::HandshakeTimeout { elapsed: config.handshake_timeout };
                    let actions = self.channel.terminate(Some(error));
                    self.execute(actions).await;
                },

                Some(reason) = failures.recv() => {
                    let actions = self.channel.handle_transport_error(reason);
                    self.execute(actions).await;
                },

                command = commands.recv(), if commands_open => match command {
                    Some(Command::Write(plaintext)) => self.write(&plaintext).await,
                    Some(Command::End) => {
                        let actions = self.channel.end();
                        self.execute(actions).await;
                    },
                    None => {
                        commands_open = false;
                        tracing::debug!("stream handle dropped");
                        let actions = self.channel.end();
                        self.execute(actions).await;
                    },
                },

                result = reader.read(&mut buf), if reading => {
                    let actions = match result {
                        Ok(0) => self.channel.handle_transport_closed(),
                        Ok(n) => self.channel.handle_data(&buf[..n]),
                        Err(err) => self.channel.handle_transport_error(err.to_string()),
                    };
                    self.execute(actions).await;
                },

                else => {
                    let actions = self.channel.terminate(None);
                    self.execute(actions).await;
                    self.finished = true;
                },
            }
        }
    }

    async fn write(&mut self, plaintext: &[u8]) {
        let wire_size = plaintext.len() + PACKET_OVERHEAD;

        match self.channel.write(plaintext) {
            Ok(actions) => {
                for action in actions {
                    match action {
                        ChannelAction::Send(bytes) => self.send_wire(bytes, wire_size),
                        other => self.execute(vec![other]).await,
                    }
                }
            },
            Err(err) => {
                tracing::debug!(%err, "write rejected by channel");
                self.shared.release(wire_size);
            },
        }
    }

    fn send_wire(&self, bytes: Bytes, counted: usize) {
        if self.outbound.send(Outbound::Wire { bytes, counted }).is_err() {
            self.shared.release(counted);
        }
    }

    async fn execute(&mut self, actions: Vec<ChannelAction>) {
        for action in actions {
            match action {
                ChannelAction::Send(bytes) => self.send_wire(bytes, 0),
                ChannelAction::Connected { remote_static } => {
                    tracing::info!(remote = %remote_static, "handshake complete");
                    self.shared.ready.store(true, Ordering::Release);
                    let _ = self.events.send(StreamEvent::Connected { remote_static }).await;
                },
                ChannelAction::Readable => {},
                ChannelAction::ScheduleResume => self.resume_pending = true,
                ChannelAction::Close { error } => self.close(error).await,
            }
        }
    }

    async fn close(&mut self, error: Option<ChannelError>) {
        self.finished = true;
        self.shared.ready.store(false, Ordering::Release);

        // The transport closes before the consumer is waited on
        self.shared.mark_closed();
        let _ = self.outbound.send(Outbound::Shutdown);

        // Messages already authenticated are delivered ahead of the close
        while let Some(message) = self.channel.read() {
            if self.events.send(StreamEvent::Message(message)).await.is_err() {
                break;
            }
        }

        let event = match error {
            Some(err) => {
                if err.is_protocol_violation() {
                    tracing::warn!(%err, "stream failed");
                } else {
                    tracing::info!(%err, "stream failed");
                }
                StreamEvent::Error(err)
            },
            None => {
                tracing::info!("stream closed");
                StreamEvent::Closed
            },
        };
        let _ = self.events.send(event).await;
    }
}

/// Write packets in order until shutdown, then close the write half.
async fn write_loop<W>(
    mut writer: WriteHalf<W>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    failures: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
) where
    W: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Wire { bytes, counted } => {
                if let Err(err) = writer.write_all(&bytes).await {
                    tracing::debug!(%err, "transport write failed");
                    shared.release(counted);
                    let _ = failures.send(err.to_string());
                    break;
                }
                shared.release(counted);
            },
            Outbound::Shutdown => break,
        }
    }

    if let Err(err) = writer.shutdown().await {
        tracing::debug!(%err, "transport shutdown failed");
    }

    // Anything still queued will never be written
    while let Ok(item) = outbound.try_recv() {
        if let Outbound::Wire { counted, .. } = item {
            shared.release(counted);
        }
    }
    shared.mark_flushed();
}
