//! Typed application messages between two communities.

use std::time::Duration;

use overlay_community::{CommunitySettings, Delivery, Overlay};
use overlay_core::crypto::Keypair;
use overlay_core::message::pack_auth;
use overlay_core::wire::{service_id, Prefix};
use overlay_core::FormatError;

use crate::*;

fn pair() -> Network<Tally> {
    let mut net = Network::new();
    net.spawn(7001, Tally::default(), CommunitySettings::new("a", service_id(b"tally")));
    net.spawn(7002, Tally::default(), CommunitySettings::new("b", service_id(b"tally")));
    net
}

#[test]
fn test_custom_message_is_decoded_and_clock_synced() {
    let mut net = pair();
    let now = net.now;

    let sender_time = net
        .node_mut(0)
        .with_context(now, |_, ctx| {
            ctx.send(addr(7002), COUNT_MESSAGE, &Count(7))?;
            Ok::<_, FormatError>(ctx.global_time())
        })
        .unwrap();
    let local_before = net.node(1).context().global_time();

    let outcomes = net.deliver_round();
    assert_eq!(outcomes, vec![Delivery::Dispatched { message_id: COUNT_MESSAGE }]);

    let received = &net.node(1).hooks().received;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].value, 7);
    assert_eq!(received[0].from, addr(7001));
    assert_eq!(received[0].sender_time, sender_time);
    assert_eq!(received[0].clock_after, local_before.max(sender_time) + 1);
    assert_eq!(net.node(1).context().global_time(), local_before.max(sender_time) + 1);
}

#[test]
fn test_receiver_clock_jumps_past_a_later_sender() {
    let mut net = pair();
    let now = net.now;
    let sender = Keypair::generate();
    let prefix = Prefix::new(service_id(b"tally"));
    let raw = pack_auth(&sender, &prefix, COUNT_MESSAGE, 1_000, &Count(3)).unwrap();

    net.node_mut(1).deliver(addr(9000), &raw, now);
    assert_eq!(net.node(1).context().global_time(), 1_001);

    // An older stamp never moves the clock backwards.
    let raw = pack_auth(&sender, &prefix, COUNT_MESSAGE, 5, &Count(4)).unwrap();
    net.node_mut(1).deliver(addr(9000), &raw, now);
    assert_eq!(net.node(1).context().global_time(), 1_002);
    assert_eq!(net.node(1).hooks().received.len(), 2);
}

#[test]
fn test_sender_becomes_a_peer() {
    let mut net = pair();
    let now = net.now;
    net.node_mut(0)
        .with_context(now, |_, ctx| ctx.send(addr(7002), COUNT_MESSAGE, &Count(1)))
        .unwrap();
    net.deliver_round();

    let peers = net.node(1).context().peers();
    assert_eq!(peers.len(), 1);
    let peer = peers.get(&net.nodes[0].keypair.public).expect("sender should be known");
    assert_eq!(peer.address, addr(7001));
    assert_eq!(net.node(0).peer_count(), 0);
}

#[test]
fn test_reply_via_send_to_peer() {
    let mut net = pair();
    let now = net.now;
    net.node_mut(0)
        .with_context(now, |_, ctx| ctx.send(addr(7002), COUNT_MESSAGE, &Count(1)))
        .unwrap();
    net.deliver_round();

    let sender_key = net.nodes[0].keypair.public;
    net.node_mut(1)
        .with_context(now, |_, ctx| {
            let peer = ctx.peers().get(&sender_key).cloned().expect("sender is known");
            ctx.send_to_peer(&peer, COUNT_MESSAGE, &Count(2))
        })
        .unwrap();
    net.deliver_round();

    let received = &net.node(0).hooks().received;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].value, 2);
    assert_eq!(received[0].from, addr(7002));
}

#[test]
fn test_broadcast_reaches_every_known_peer() {
    let mut net = Network::new();
    for port in 7101..7104 {
        net.spawn(port, Tally::default(), CommunitySettings::new("n", service_id(b"tally")));
    }
    let now = net.now;
    for i in 1..3 {
        net.node_mut(i)
            .with_context(now, |_, ctx| ctx.send(addr(7101), COUNT_MESSAGE, &Count(0)))
            .unwrap();
    }
    net.deliver_round();
    assert_eq!(net.node(0).peer_count(), 2);

    let later = now + Duration::from_secs(1);
    let sent = net
        .node_mut(0)
        .with_context(later, |_, ctx| ctx.broadcast(COUNT_MESSAGE, &Count(9)))
        .unwrap();
    assert_eq!(sent, 2);
    net.deliver_round();
    for i in 1..3 {
        let received = &net.node(i).hooks().received;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].value, 9);
    }
}
