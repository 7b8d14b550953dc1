//! Fuzz target for hostile handshake input
//!
//! An unauthenticated peer controls every byte a responder or initiator
//! reads before the handshake completes.
//!
//! # Strategy
//!
//! - Feed arbitrary bytes in arbitrary fragments to a fresh responder
//! - Feed arbitrary bytes as act two to an initiator that sent act one
//! - Optionally start from a valid act one so act three parsing is reached
//!
//! # Invariants
//!
//! - Never panic
//! - At most one `Close` action over the channel's lifetime
//! - A handshake failure leaves the channel closed and inert
//! - Random bytes never complete a handshake

#![no_main]

use arbitrary::Arbitrary;
use boltlink_core::{ChannelAction, ChannelConfig, SecureChannel};
use boltlink_crypto::KeyPair;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Target {
    /// Fresh responder reading act one
    Responder,
    /// Responder that already received a valid act one, reading act three
    ResponderAfterActOne,
    /// Initiator reading act two
    Initiator,
}

#[derive(Debug, Arbitrary)]
struct Input {
    target: Target,
    chunks: Vec<Vec<u8>>,
}

fn key(byte: u8) -> KeyPair {
    KeyPair::from_secret_bytes(&[byte; 32]).expect("fixed scalar is valid")
}

fn channel_under_test(target: &Target) -> SecureChannel {
    let config = ChannelConfig::default();
    match target {
        Target::Responder => SecureChannel::responder_with_ephemeral(key(0x21), key(0x22), config),
        Target::ResponderAfterActOne => {
            let (_initiator, actions) =
                SecureChannel::initiator_with_ephemeral(key(0x11), key(0x21).public_key(), key(0x12), config.clone());
            let mut responder = SecureChannel::responder_with_ephemeral(key(0x21), key(0x22), config);
            for action in actions {
                if let ChannelAction::Send(bytes) = action {
                    let _ = responder.handle_data(&bytes);
                }
            }
            responder
        },
        Target::Initiator => {
            SecureChannel::initiator_with_ephemeral(key(0x11), key(0x21).public_key(), key(0x12), config).0
        },
    }
}

fuzz_target!(|input: Input| {
    let mut channel = channel_under_test(&input.target);
    let mut closes = 0;

    for chunk in &input.chunks {
        let was_closed = channel.is_closed();
        let actions = channel.handle_data(chunk);

        if was_closed {
            assert!(actions.is_empty(), "closed channel must ignore input");
        }

        for action in &actions {
            match action {
                ChannelAction::Close { error } => {
                    closes += 1;
                    assert!(error.is_some(), "handshake input never closes gracefully");
                },
                ChannelAction::Connected { .. } => panic!("forged handshake completed"),
                _ => {},
            }
        }
    }

    assert!(closes <= 1, "close emitted {closes} times");
    assert!(!channel.is_ready());
});
