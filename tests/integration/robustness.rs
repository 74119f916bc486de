//! Garbage, forgeries and foreign traffic never reach a handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use overlay_community::{CommunityContext, CommunitySettings, CommunityState, Delivery, Overlay};
use overlay_core::crypto::Keypair;
use overlay_core::wire::{service_id, HEADER_LEN, PREFIX_LEN, PUBLIC_KEY_LEN};

use crate::*;

fn pair() -> Network<Tally> {
    let mut net = Network::new();
    net.spawn(7401, Tally::default(), CommunitySettings::new("a", service_id(b"tally")));
    net.spawn(7402, Tally::default(), CommunitySettings::new("b", service_id(b"tally")));
    net
}

/// A signed count from node 0 to node 1, taken off the wire.
fn captured(net: &mut Network<Tally>, value: u32) -> Vec<u8> {
    let now = net.now;
    net.node_mut(0)
        .with_context(now, |_, ctx| ctx.send(addr(7402), COUNT_MESSAGE, &Count(value)))
        .unwrap();
    let mut sent = net.nodes[0].transport.drain();
    assert_eq!(sent.len(), 1);
    sent.remove(0).data.to_vec()
}

#[test]
fn test_one_byte_datagram_changes_nothing() {
    let mut net = pair();
    let now = net.now;
    let stats = net.node(1).stats();
    let clock = net.node(1).context().global_time();

    for garbage in [&[][..], &[0x02][..], &[0xff][..]] {
        let outcome = net.node_mut(1).deliver(addr(7401), garbage, now);
        assert_eq!(outcome, Delivery::ForeignPrefix);
        assert!(!outcome.reached_handler());
    }

    let node = net.node(1);
    assert!(node.hooks().received.is_empty());
    assert_eq!(node.state(), CommunityState::Running);
    assert_eq!(node.stats(), stats);
    assert_eq!(node.context().global_time(), clock);
    assert_eq!(node.peer_count(), 0);
}

#[test]
fn test_header_without_payloads_is_malformed() {
    let mut net = pair();
    let raw = captured(&mut net, 1);
    let now = net.now;

    let outcome = net.node_mut(1).deliver(addr(7401), &raw[..HEADER_LEN], now);
    assert_eq!(outcome, Delivery::Malformed { message_id: COUNT_MESSAGE });
    assert!(net.node(1).hooks().received.is_empty());
    assert_eq!(net.node(1).peer_count(), 0);
}

#[test]
fn test_tampered_body_is_dropped() {
    let mut net = pair();
    let mut raw = captured(&mut net, 7);
    let now = net.now;
    let body_at = raw.len() - 64 - 1;
    raw[body_at] ^= 0x01;

    let outcome = net.node_mut(1).deliver(addr(7401), &raw, now);
    assert_eq!(outcome, Delivery::Unauthenticated { message_id: COUNT_MESSAGE });
    assert!(net.node(1).hooks().received.is_empty());
    assert_eq!(net.node(1).context().global_time(), 0);
    assert_eq!(net.node(1).stats().dropped, 1);
}

#[test]
fn test_substituted_key_is_dropped() {
    let mut net = pair();
    let mut raw = captured(&mut net, 7);
    let now = net.now;

    // Auth payload: 2-byte length, then the key.
    let key_at = HEADER_LEN + 2;
    let impostor = Keypair::generate();
    raw[key_at..key_at + PUBLIC_KEY_LEN].copy_from_slice(&impostor.public);

    let outcome = net.node_mut(1).deliver(addr(7401), &raw, now);
    assert_eq!(outcome, Delivery::Unauthenticated { message_id: COUNT_MESSAGE });
    assert_eq!(net.node(1).peer_count(), 0);
}

#[test]
fn test_replayed_message_is_accepted_again() {
    // No replay protection at this layer: a verified duplicate is handled
    // like any other message and still advances the clock.
    let mut net = pair();
    let raw = captured(&mut net, 5);
    let now = net.now;

    net.node_mut(1).deliver(addr(7401), &raw, now);
    let first = net.node(1).context().global_time();
    net.node_mut(1).deliver(addr(7401), &raw, now);
    assert_eq!(net.node(1).hooks().received.len(), 2);
    assert_eq!(net.node(1).context().global_time(), first + 1);
    assert_eq!(net.node(1).peer_count(), 1);
}

#[test]
fn test_other_service_traffic_is_isolated() {
    let mut net = Network::new();
    net.spawn(7411, Tally::default(), CommunitySettings::new("a", service_id(b"tally")));
    net.spawn(7412, Tally::default(), CommunitySettings::new("b", service_id(b"other")));
    let now = net.now;

    net.node_mut(0)
        .with_context(now, |_, ctx| ctx.send(addr(7412), COUNT_MESSAGE, &Count(1)))
        .unwrap();
    assert_eq!(net.deliver_round(), vec![Delivery::ForeignPrefix]);

    let node = net.node(1);
    assert!(node.hooks().received.is_empty());
    assert_eq!(node.peer_count(), 0);
    assert_eq!(node.stats().dropped, 0);
    assert_ne!(net.node(0).prefix(), net.node(1).prefix());
    assert_eq!(net.node(0).prefix().as_bytes().len(), PREFIX_LEN);
}

#[test]
fn test_unknown_message_id_is_dropped() {
    let mut net = pair();
    let now = net.now;
    net.node_mut(0)
        .with_context(now, |_, ctx| ctx.send(addr(7402), 99, &Count(1)))
        .unwrap();
    assert_eq!(net.deliver_round(), vec![Delivery::UnknownMessage { message_id: 99 }]);
    assert!(net.node(1).hooks().received.is_empty());
}

#[test]
fn test_cancellation_is_idempotent() {
    let mut net = pair();
    let runs = Arc::new(AtomicUsize::new(0));
    let now = net.now;

    let counter = runs.clone();
    net.node_mut(0)
        .with_context(now, |_, ctx| {
            let task = move |_: &mut Tally,
                             _: &mut CommunityContext<Tally>|
                  -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            };
            ctx.register_delayed("later", Duration::from_secs(1), task)
        })
        .unwrap();

    let (first, second) = net.node_mut(0).with_context(now, |_, ctx| {
        (ctx.cancel_task("later"), ctx.cancel_task("later"))
    });
    assert!(first);
    assert!(!second);
    assert!(!net.node(0).context().is_task_pending("later"));

    assert_eq!(net.node_mut(0).poll(now + Duration::from_secs(2)), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // Cancelling a name that never existed is also fine.
    let cancelled = net
        .node_mut(0)
        .with_context(now, |_, ctx| ctx.cancel_task("never-registered"));
    assert!(!cancelled);
}

#[test]
fn test_task_can_cancel_itself() {
    let mut net = pair();
    let runs = Arc::new(AtomicUsize::new(0));
    let now = net.now;

    let counter = runs.clone();
    net.node_mut(0)
        .with_context(now, |_, ctx| {
            let task = move |_: &mut Tally,
                             ctx: &mut CommunityContext<Tally>|
                  -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.cancel_task("once");
                Ok(())
            };
            ctx.register_periodic("once", Duration::from_secs(1), true, task)
        })
        .unwrap();

    let mut t = now;
    for _ in 0..5 {
        net.node_mut(0).poll(t);
        t += Duration::from_secs(1);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!net.node(0).context().is_task_pending("once"));
}

#[test]
fn test_unloaded_community_ignores_traffic() {
    let mut net = pair();
    let raw = captured(&mut net, 3);
    let now = net.now;

    net.node_mut(1).unload();
    assert_eq!(net.node_mut(1).deliver(addr(7401), &raw, now), Delivery::NotRunning);
    assert!(net.node(1).hooks().received.is_empty());
    assert!(net.node_mut(1).perform("anything", now).is_err());
}
