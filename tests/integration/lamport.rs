//! Three Lamport clock communities finding each other and exchanging clocks.

use std::net::SocketAddr;
use std::time::Duration;

use overlay_community::lamport::{
    lamport_service_id, ClockMessage, LamportCommunity, CLOCK_MESSAGE, START_TASK,
};
use overlay_community::{
    CommunitySettings, CommunityState, Delivery, Overlay, RandomWalk, RandomWalkConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::*;

const STEP: Duration = Duration::from_millis(500);

fn settings(port: u16, bootstrap: Vec<SocketAddr>) -> CommunitySettings {
    let walk = RandomWalk::with_rng(
        RandomWalkConfig::default(),
        bootstrap,
        StdRng::seed_from_u64(port as u64),
    );
    CommunitySettings::new("lamport", lamport_service_id())
        .with_walk(walk)
        .with_walk_interval(STEP)
}

/// Node 1 is the bootstrap for nodes 0 and 2.
fn triangle() -> Network<LamportCommunity> {
    let mut net = Network::new();
    for (port, bootstrap) in [
        (7201, vec![addr(7202)]),
        (7202, vec![]),
        (7203, vec![addr(7202)]),
    ] {
        net.spawn(port, LamportCommunity::new(STEP), settings(port, bootstrap));
    }
    net
}

fn assert_strictly_increasing(observations: &[u64]) {
    for pair in observations.windows(2) {
        assert!(pair[0] < pair[1], "observations not increasing: {observations:?}");
    }
}

#[test]
fn test_three_nodes_observe_increasing_clocks() {
    let mut net = triangle();

    for _ in 0..20 {
        net.tick(STEP);
    }
    let early: Vec<Vec<u64>> = (0..3)
        .map(|i| net.node(i).hooks().observations().to_vec())
        .collect();
    for (i, obs) in early.iter().enumerate() {
        assert!(!obs.is_empty(), "node {i} never received a clock");
        assert_strictly_increasing(obs);
    }

    for _ in 0..20 {
        net.tick(STEP);
    }
    for (i, before) in early.iter().enumerate() {
        let after = net.node(i).hooks().observations();
        assert_strictly_increasing(after);
        assert!(after.len() > before.len(), "node {i} stopped observing");
        assert!(after.last() > before.last());
        // Earlier observations are never rewritten.
        assert_eq!(&after[..before.len()], &before[..]);
    }
}

#[test]
fn test_start_task_cancels_itself_once_peers_are_known() {
    let mut net = triangle();
    for i in 0..3 {
        assert!(net.node(i).context().is_task_pending(START_TASK));
    }
    for _ in 0..20 {
        net.tick(STEP);
    }
    for i in 0..3 {
        assert!(net.node(i).peer_count() >= 1);
        assert!(!net.node(i).context().is_task_pending(START_TASK));
    }
}

#[test]
fn test_start_action_sends_clock_immediately() {
    let mut net = Network::new();
    for port in [7211, 7212] {
        let settings = CommunitySettings::new("l", lamport_service_id());
        net.spawn(port, LamportCommunity::new(Duration::from_secs(60)), settings);
    }
    let now = net.now;

    // Let node 0 learn node 1 through one clock message from node 1.
    net.node_mut(1)
        .with_context(now, |_, ctx| {
            ctx.send(addr(7211), CLOCK_MESSAGE, &ClockMessage { clock: 0 })
        })
        .unwrap();
    let outcomes = net.deliver_round();
    assert_eq!(outcomes, vec![Delivery::Dispatched { message_id: CLOCK_MESSAGE }]);
    assert_eq!(net.node(0).hooks().clock(), 1);

    // The echo is in flight; drop it so only the action's message counts.
    net.nodes[0].transport.drain();
    net.node_mut(0).perform(START_TASK, now).unwrap();
    assert_eq!(net.in_flight(), 1);
    net.deliver_round();
    assert_eq!(net.node(1).hooks().observations(), &[2]);
    assert!(!net.node(0).context().is_task_pending(START_TASK));
}

#[test]
fn test_unloaded_node_stops_observing() {
    let mut net = triangle();
    for _ in 0..20 {
        net.tick(STEP);
    }
    net.node_mut(0).unload();
    assert_eq!(net.node(0).state(), CommunityState::Unloaded);
    let frozen = net.node(0).hooks().observations().len();

    for _ in 0..10 {
        net.tick(STEP);
    }
    assert_eq!(net.node(0).hooks().observations().len(), frozen);
    assert_eq!(net.node(0).peer_count(), 0);
}
