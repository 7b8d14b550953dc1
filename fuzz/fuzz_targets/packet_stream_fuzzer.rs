//! Fuzz target for the transport packet stream
//!
//! Drives two connected channels through writes, fragmented delivery,
//! bit flips and backpressure.
//!
//! # Strategy
//!
//! - Writes of arbitrary sizes, including above the message limit
//! - Delivery in arbitrary fragment sizes
//! - Bit flips anywhere in the undelivered stream
//! - Reads and `request_more` interleaved with delivery
//!
//! # Invariants
//!
//! - Delivered messages are a prefix of the accepted writes, in order
//! - A flipped bit is detected before any tampered message is delivered
//! - Oversized writes are rejected without affecting later traffic
//! - Never panic

#![no_main]

use std::collections::VecDeque;

use arbitrary::Arbitrary;
use boltlink_core::{ChannelAction, ChannelConfig, ChannelError, MAX_MESSAGE_SIZE, SecureChannel};
use boltlink_crypto::KeyPair;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Write { len: u16, fill: u8, oversized: bool },
    Deliver { max: u8 },
    Flip { offset: u16, mask: u8 },
    Read,
    RequestMore,
    Resume,
}

#[derive(Debug, Arbitrary)]
struct Input {
    high_water: u8,
    ops: Vec<Op>,
}

fn key(byte: u8) -> KeyPair {
    KeyPair::from_secret_bytes(&[byte; 32]).expect("fixed scalar is valid")
}

fn sent_bytes(actions: Vec<ChannelAction>, out: &mut VecDeque<u8>) {
    for action in actions {
        if let ChannelAction::Send(bytes) = action {
            out.extend(bytes.iter());
        }
    }
}

fn handshake(config: &ChannelConfig) -> (SecureChannel, SecureChannel) {
    let (mut initiator, actions) =
        SecureChannel::initiator_with_ephemeral(key(0x11), key(0x21).public_key(), key(0x12), config.clone());
    let mut responder = SecureChannel::responder_with_ephemeral(key(0x21), key(0x22), config.clone());

    let mut to_responder = VecDeque::new();
    let mut to_initiator = VecDeque::new();
    sent_bytes(actions, &mut to_responder);

    while !to_responder.is_empty() || !to_initiator.is_empty() {
        let bytes: Vec<u8> = to_responder.drain(..).collect();
        sent_bytes(responder.handle_data(&bytes), &mut to_initiator);
        let bytes: Vec<u8> = to_initiator.drain(..).collect();
        sent_bytes(initiator.handle_data(&bytes), &mut to_responder);
    }

    assert!(initiator.is_ready() && responder.is_ready());
    (initiator, responder)
}

fuzz_target!(|input: Input| {
    let config = ChannelConfig { inbox_high_water: usize::from(input.high_water.max(1)) };
    let (mut initiator, mut responder) = handshake(&config);

    let mut wire = VecDeque::new();
    let mut accepted: Vec<Bytes> = Vec::new();
    let mut delivered: Vec<Bytes> = Vec::new();
    let mut tampered = false;
    let mut failure: Option<ChannelError> = None;

    for op in input.ops {
        let actions = match op {
            Op::Write { len, fill, oversized } => {
                let len = if oversized { MAX_MESSAGE_SIZE + 1 + usize::from(len) } else { usize::from(len) };
                let message = vec![fill; len];
                match initiator.write(&message) {
                    Ok(actions) => {
                        assert!(len <= MAX_MESSAGE_SIZE);
                        accepted.push(Bytes::from(message));
                        sent_bytes(actions, &mut wire);
                    },
                    Err(err) => {
                        assert!(oversized);
                        assert!(matches!(err, ChannelError::MessageTooLarge { .. }));
                    },
                }
                continue;
            },
            Op::Deliver { max } => {
                if responder.is_blocked() {
                    continue;
                }
                let take = usize::from(max.max(1)).min(wire.len());
                let chunk: Vec<u8> = wire.drain(..take).collect();
                responder.handle_data(&chunk)
            },
            Op::Flip { offset, mask } => {
                if mask != 0 && !wire.is_empty() {
                    let index = usize::from(offset) % wire.len();
                    wire[index] ^= mask;
                    tampered = true;
                }
                continue;
            },
            Op::Read => {
                if let Some(message) = responder.read() {
                    delivered.push(message);
                }
                continue;
            },
            Op::RequestMore => responder.request_more(),
            Op::Resume => responder.resume(),
        };

        for action in actions {
            if let ChannelAction::Close { error } = action {
                assert!(failure.is_none(), "close emitted twice");
                failure = Some(error.unwrap_or(ChannelError::Closed));
            }
        }
    }

    while let Some(message) = responder.read() {
        delivered.push(message);
    }

    assert!(delivered.len() <= accepted.len());
    assert_eq!(&delivered[..], &accepted[..delivered.len()]);
    if !tampered {
        assert!(failure.is_none());
    }
    if let Some(err) = failure {
        assert!(tampered);
        assert!(matches!(err, ChannelError::AuthenticationFailed { .. }), "unexpected failure: {err}");
    }
});
