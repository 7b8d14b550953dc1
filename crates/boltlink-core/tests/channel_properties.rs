//! Property-based tests for the secure channel
//!
//! These tests verify delivery, ordering and nonce accounting for ALL valid
//! inputs, not just specific examples. The handshake runs with fixed keys so
//! every case exercises the same transcript.

use boltlink_core::{
    ChannelAction, ChannelConfig, HandshakeEngine, KEY_ROTATION_INTERVAL, MAX_MESSAGE_SIZE,
    SecureChannel,
};
use boltlink_crypto::KeyPair;
use proptest::prelude::*;

fn pair(byte: u8) -> KeyPair {
    KeyPair::from_secret_bytes(&[byte; 32]).expect("valid scalar")
}

fn sent(actions: &[ChannelAction]) -> Vec<u8> {
    let mut wire = Vec::new();
    for action in actions {
        if let ChannelAction::Send(bytes) = action {
            wire.extend_from_slice(bytes);
        }
    }
    wire
}

fn ready_pair(config: ChannelConfig) -> (SecureChannel, SecureChannel) {
    let responder_static = pair(0x21);
    let (mut initiator, act_one) = SecureChannel::initiator_with_ephemeral(
        pair(0x11),
        responder_static.public_key(),
        pair(0x12),
        config.clone(),
    );
    let mut responder = SecureChannel::responder_with_ephemeral(responder_static, pair(0x22), config);

    let act_two = responder.handle_data(&sent(&act_one));
    let act_three = initiator.handle_data(&sent(&act_two));
    responder.handle_data(&sent(&act_three));

    assert!(initiator.is_ready(), "initiator should be ready");
    assert!(responder.is_ready(), "responder should be ready");
    (initiator, responder)
}

/// Split `wire` at the given cut points (each taken modulo the length).
fn fragment(wire: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    if wire.is_empty() {
        return Vec::new();
    }

    let mut points: Vec<usize> = cuts.iter().map(|cut| cut % wire.len()).collect();
    points.push(0);
    points.push(wire.len());
    points.sort_unstable();
    points.dedup();

    points.windows(2).map(|w| wire[w[0]..w[1]].to_vec()).collect()
}

fn drain(channel: &mut SecureChannel) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(message) = channel.read() {
        out.push(message.to_vec());
    }
    out
}

#[test]
fn prop_messages_arrive_in_order() {
    proptest!(|(messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..32))| {
        let (mut initiator, mut responder) = ready_pair(ChannelConfig { inbox_high_water: 64 });

        for message in &messages {
            let actions = initiator.write(message).expect("write should succeed");
            responder.handle_data(&sent(&actions));
        }

        // PROPERTY: delivery preserves content and order
        prop_assert_eq!(drain(&mut responder), messages);
    });
}

#[test]
fn prop_fragmentation_is_invisible() {
    proptest!(|(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..16),
        cuts in prop::collection::vec(any::<usize>(), 0..64)
    )| {
        let responder_static = pair(0x21);
        let (mut initiator, act_one) = SecureChannel::initiator_with_ephemeral(
            pair(0x11),
            responder_static.public_key(),
            pair(0x12),
            ChannelConfig { inbox_high_water: 64 },
        );
        let mut responder = SecureChannel::responder_with_ephemeral(
            responder_static,
            pair(0x22),
            ChannelConfig { inbox_high_water: 64 },
        );

        // Act one arrives in arbitrary pieces
        let mut replies = Vec::new();
        for chunk in fragment(&sent(&act_one), &cuts) {
            replies.extend(responder.handle_data(&chunk));
        }
        let act_three = initiator.handle_data(&sent(&replies));

        // Act three and all packets share one byte stream
        let mut wire = sent(&act_three);
        for message in &messages {
            wire.extend(sent(&initiator.write(message).expect("write should succeed")));
        }
        for chunk in fragment(&wire, &cuts) {
            responder.handle_data(&chunk);
        }

        // PROPERTY: chunk boundaries never change what is delivered
        prop_assert!(responder.is_ready());
        prop_assert_eq!(drain(&mut responder), messages);
    });
}

#[test]
fn prop_nonce_advances_twice_per_message() {
    proptest!(|(count in 1usize..600)| {
        let responder_static = pair(0x21);
        let mut engine = HandshakeEngine::initiator(pair(0x11), responder_static.public_key());
        let mut peer = HandshakeEngine::responder(responder_static);

        let act_one = engine.produce_act_one(pair(0x12)).expect("act one");
        peer.consume_act_one(&act_one).expect("consume act one");
        let act_two = peer.produce_act_two(pair(0x22)).expect("act two");
        engine.consume_act_two(&act_two).expect("consume act two");
        engine.produce_act_three().expect("act three");

        for _ in 0..count {
            engine.encrypt(b"tick").expect("encrypt");
        }

        let cipher = engine.cipher().expect("complete");
        let nonces_used = 2 * count as u64;

        // PROPERTY: two nonces per message, rotating every interval
        prop_assert_eq!(cipher.send_rotations(), nonces_used / KEY_ROTATION_INTERVAL);
        prop_assert_eq!(cipher.send_nonce(), nonces_used % KEY_ROTATION_INTERVAL);
    });
}

#[test]
fn prop_backpressure_never_loses_messages() {
    proptest!(|(
        high_water in 1usize..8,
        count in 1usize..64,
        reads_per_turn in 1usize..8
    )| {
        let (mut initiator, mut responder) = ready_pair(ChannelConfig { inbox_high_water: high_water });

        let mut wire = Vec::new();
        for i in 0..count {
            wire.extend(sent(&initiator.write(&(i as u32).to_be_bytes()).expect("write")));
        }
        responder.handle_data(&wire);

        let mut received = Vec::new();
        let mut turns = 0;
        while received.len() < count {
            // PROPERTY: the inbox never exceeds the high-water mark
            prop_assert!(responder.pending_len() <= high_water);

            for _ in 0..reads_per_turn {
                if let Some(message) = responder.read() {
                    received.push(message.to_vec());
                }
            }
            if responder.request_more() == vec![ChannelAction::ScheduleResume] {
                responder.resume();
            }

            turns += 1;
            prop_assert!(turns <= count * 2 + 2, "no progress after {} turns", turns);
        }

        let expected: Vec<Vec<u8>> = (0..count).map(|i| (i as u32).to_be_bytes().to_vec()).collect();

        // PROPERTY: every message delivered exactly once, in order
        prop_assert_eq!(received, expected);
    });
}

#[test]
fn largest_message_round_trips() {
    let (mut initiator, mut responder) = ready_pair(ChannelConfig::default());
    let message = vec![0x5A; MAX_MESSAGE_SIZE];

    let actions = initiator.write(&message).expect("max-size write");
    responder.handle_data(&sent(&actions));

    assert_eq!(responder.read().expect("delivered").len(), MAX_MESSAGE_SIZE);
}

#[test]
fn oversized_write_leaves_channel_usable() {
    let (mut initiator, mut responder) = ready_pair(ChannelConfig::default());

    let result = initiator.write(&vec![0u8; MAX_MESSAGE_SIZE + 1]);
    assert!(result.is_err());
    assert!(initiator.is_ready());

    let actions = initiator.write(b"after").expect("write after rejection");
    responder.handle_data(&sent(&actions));
    assert_eq!(responder.read().expect("delivered").as_ref(), b"after");
}

#[test]
fn thousand_and_one_round_trips_cross_rotation() {
    let (mut initiator, mut responder) = ready_pair(ChannelConfig::default());

    for i in 0..1001u32 {
        let ping = format!("ping {i}");
        responder.handle_data(&sent(&initiator.write(ping.as_bytes()).expect("ping")));
        assert_eq!(responder.read().expect("ping delivered").as_ref(), ping.as_bytes());

        let pong = format!("pong {i}");
        initiator.handle_data(&sent(&responder.write(pong.as_bytes()).expect("pong")));
        assert_eq!(initiator.read().expect("pong delivered").as_ref(), pong.as_bytes());
    }

    assert!(initiator.is_ready() && responder.is_ready());
    assert_eq!(initiator.messages_sent(), 1001);
    assert_eq!(responder.messages_received(), 1001);
}
