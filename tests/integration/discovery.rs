//! Random-walk discovery over the simulated network.

use std::net::SocketAddr;
use std::time::Duration;

use overlay_community::{
    CommunitySettings, CommunityState, Overlay, RandomChurn, RandomChurnConfig, RandomWalk,
    RandomWalkConfig,
};
use overlay_core::wire::service_id;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::*;

const STEP: Duration = Duration::from_millis(500);

fn walk_settings(
    port: u16,
    config: RandomWalkConfig,
    bootstrap: Vec<SocketAddr>,
) -> CommunitySettings {
    let walk = RandomWalk::with_rng(config, bootstrap, StdRng::seed_from_u64(port as u64));
    CommunitySettings::new("walker", service_id(b"discovery"))
        .with_walk(walk)
        .with_walk_interval(STEP)
}

fn bounded(target: usize) -> RandomWalkConfig {
    RandomWalkConfig {
        target_peers: Some(target),
        timeout: Duration::from_secs(3),
        ..RandomWalkConfig::default()
    }
}

#[test]
fn test_unreachable_bootstrap_leaves_table_empty() {
    let mut net = Network::new();
    net.spawn(7301, Tally::default(), walk_settings(7301, bounded(2), vec![addr(7399)]));

    for _ in 0..40 {
        net.tick(STEP);
    }

    assert_eq!(net.node(0).peer_count(), 0);
    assert_eq!(net.node(0).state(), CommunityState::Running);
    assert!(net.lost > 0, "the bootstrap address should have been contacted");
    assert_eq!(net.node(0).context().external_address(), None);
}

#[test]
fn test_no_bootstrap_sends_nothing() {
    let mut net = Network::new();
    net.spawn(7311, Tally::default(), walk_settings(7311, bounded(2), vec![]));

    for _ in 0..10 {
        net.tick(STEP);
    }

    assert_eq!(net.node(0).peer_count(), 0);
    assert_eq!(net.node(0).stats().sent, 0);
    assert_eq!(net.lost, 0);
}

#[test]
fn test_walk_converges_and_learns_external_address() {
    let mut net = Network::new();
    for (port, bootstrap) in [
        (7321, vec![addr(7322)]),
        (7322, vec![]),
        (7323, vec![addr(7322)]),
    ] {
        net.spawn(port, Tally::default(), walk_settings(port, bounded(2), bootstrap));
    }

    for _ in 0..40 {
        net.tick(STEP);
    }

    for (i, port) in [7321, 7322, 7323].into_iter().enumerate() {
        assert_eq!(net.node(i).peer_count(), 2, "node {port} should know both others");
    }
    assert_eq!(net.node(0).context().external_address(), Some(addr(7321)));
    assert_eq!(net.node(2).context().external_address(), Some(addr(7323)));
}

#[test]
fn test_walk_goes_quiet_at_target() {
    let mut net = Network::new();
    for (port, bootstrap) in [
        (7331, vec![addr(7332)]),
        (7332, vec![]),
        (7333, vec![addr(7332)]),
    ] {
        net.spawn(port, Tally::default(), walk_settings(port, bounded(2), bootstrap));
    }
    for _ in 0..40 {
        net.tick(STEP);
    }
    net.settle(8);

    let sent: Vec<u64> = (0..3).map(|i| net.node(i).stats().sent).collect();
    for _ in 0..10 {
        net.tick(STEP);
    }
    let later: Vec<u64> = (0..3).map(|i| net.node(i).stats().sent).collect();
    assert_eq!(sent, later);
}

#[test]
fn test_silent_peer_is_evicted() {
    let mut net = Network::new();
    let config = RandomWalkConfig {
        max_failures: 2,
        ..bounded(5)
    };
    net.spawn(7341, Tally::default(), walk_settings(7341, config.clone(), vec![addr(7342)]));
    net.spawn(7342, Tally::default(), walk_settings(7342, config, vec![]));

    for _ in 0..6 {
        net.tick(STEP);
    }
    assert_eq!(net.node(0).peer_count(), 1);

    // Node 1 goes away without a word; node 0 keeps asking it for introductions.
    net.node_mut(1).unload();
    for _ in 0..40 {
        net.tick(STEP);
    }
    assert_eq!(net.node(0).peer_count(), 0);
}

#[test]
fn test_churn_keeps_live_peers_and_drops_silent_ones() {
    let churn = RandomChurnConfig {
        inactive_time: Duration::from_secs(2),
        drop_time: Duration::from_secs(5),
        ping_interval: Duration::from_secs(1),
        ..RandomChurnConfig::default()
    };
    let mut net = Network::new();
    let settings = walk_settings(7351, bounded(1), vec![addr(7352)])
        .with_walk(RandomChurn::with_rng(churn, StdRng::seed_from_u64(7351)));
    net.spawn(7351, Tally::default(), settings);
    net.spawn(7352, Tally::default(), walk_settings(7352, bounded(1), vec![]));

    for _ in 0..6 {
        net.tick(STEP);
    }
    assert_eq!(net.node(0).peer_count(), 1);

    // The walk is quiet at its target; only churn traffic keeps the peer fresh.
    for _ in 0..30 {
        net.tick(STEP);
    }
    assert_eq!(net.node(0).peer_count(), 1);

    net.node_mut(1).unload();
    for _ in 0..20 {
        net.tick(STEP);
    }
    assert_eq!(net.node(0).peer_count(), 0);
}
