//! Peer discovery strategies.
//!
//! A strategy decides whom to contact with an introduction request each time
//! the community's walk task fires. It never sends anything itself; it hands
//! addresses to a `contact` callback and hears back through `on_response`.
//!
//! [`RandomWalk`] is the stock strategy: a bounded window of outstanding
//! requests to uniformly chosen candidates, dropping table entries that stop
//! answering. [`RandomChurn`] does no discovery of its own; it samples the
//! table, contacts peers that have gone quiet and drops the ones that stay
//! quiet.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use overlay_core::config::WalkerConfig;
use overlay_core::wire::{INTRODUCTION_TIMEOUT_SECS, UNKNOWN_ADDRESS};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace};

use crate::peer_table::PeerTable;

/// Introduced addresses remembered as future candidates.
const MAX_INTRODUCED: usize = 32;

pub trait WalkStrategy: Send {
    fn name(&self) -> &'static str;

    /// One walk step. May evict from `peers`; calls `contact` for each address
    /// that should receive an introduction request now.
    fn take_step(
        &mut self,
        now: Instant,
        peers: &mut PeerTable,
        contact: &mut dyn FnMut(SocketAddr),
    );

    /// A verified introduction response arrived from `from`, optionally
    /// naming another peer worth contacting.
    fn on_response(&mut self, from: SocketAddr, introduced: Option<SocketAddr>);

    /// Requests still waiting for an answer.
    fn outstanding(&self) -> usize;
}

// ── RandomWalk ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RandomWalkConfig {
    /// Stop walking once the table holds this many peers. `None` = never.
    pub target_peers: Option<usize>,
    /// How long a request may stay unanswered before it counts as failed.
    pub timeout: Duration,
    /// Maximum outstanding requests.
    pub window_size: usize,
    /// Failed requests before a table entry is evicted.
    pub max_failures: u32,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            target_peers: Some(20),
            timeout: Duration::from_secs(INTRODUCTION_TIMEOUT_SECS),
            window_size: 5,
            max_failures: 3,
        }
    }
}

impl From<&WalkerConfig> for RandomWalkConfig {
    fn from(c: &WalkerConfig) -> Self {
        Self {
            target_peers: c.target(),
            timeout: c.timeout(),
            window_size: c.window_size.max(1),
            max_failures: c.max_failures.max(1),
        }
    }
}

pub struct RandomWalk<R = StdRng> {
    config: RandomWalkConfig,
    bootstrap: Vec<SocketAddr>,
    /// Outstanding requests and when they were sent.
    pending: BTreeMap<SocketAddr, Instant>,
    failures: HashMap<SocketAddr, u32>,
    introduced: VecDeque<SocketAddr>,
    rng: R,
}

impl RandomWalk<StdRng> {
    pub fn new(config: RandomWalkConfig, bootstrap: Vec<SocketAddr>) -> Self {
        Self::with_rng(config, bootstrap, StdRng::from_entropy())
    }
}

impl<R: Rng + Send> RandomWalk<R> {
    /// Same as [`RandomWalk::new`] with a caller-supplied RNG, so a seeded
    /// walk is reproducible.
    pub fn with_rng(config: RandomWalkConfig, bootstrap: Vec<SocketAddr>, rng: R) -> Self {
        Self {
            config,
            bootstrap,
            pending: BTreeMap::new(),
            failures: HashMap::new(),
            introduced: VecDeque::new(),
            rng,
        }
    }

    pub fn config(&self) -> &RandomWalkConfig {
        &self.config
    }

    pub fn failures(&self, address: SocketAddr) -> u32 {
        self.failures.get(&address).copied().unwrap_or(0)
    }

    /// Expire timed-out requests, counting a failure against each address
    /// and evicting table entries that reached `max_failures`.
    fn expire(&mut self, now: Instant, peers: &mut PeerTable) {
        let timeout = self.config.timeout;
        let expired: Vec<SocketAddr> = self
            .pending
            .iter()
            .filter(|(_, sent)| now.saturating_duration_since(**sent) >= timeout)
            .map(|(addr, _)| *addr)
            .collect();

        for addr in expired {
            self.pending.remove(&addr);
            let count = self.failures.entry(addr).or_insert(0);
            *count += 1;
            trace!(%addr, failures = *count, "introduction request timed out");

            if *count >= self.config.max_failures {
                self.failures.remove(&addr);
                if let Some(peer) = peers.remove_by_address(addr) {
                    info!(
                        peer = peer.short_id(),
                        %addr,
                        "evicting unresponsive peer"
                    );
                }
            }
        }

        // Counts only matter for addresses that can be chosen again.
        let (bootstrap, introduced) = (&self.bootstrap, &self.introduced);
        self.failures.retain(|addr, _| {
            peers.contains_address(*addr) || bootstrap.contains(addr) || introduced.contains(addr)
        });
    }

    /// Everything worth contacting: bootstrap, table and introduced addresses,
    /// minus anything already outstanding. Order is deterministic.
    fn candidates(&self, peers: &PeerTable) -> Vec<SocketAddr> {
        let mut out: Vec<SocketAddr> = Vec::new();
        let all = self
            .bootstrap
            .iter()
            .copied()
            .chain(peers.addresses())
            .chain(self.introduced.iter().copied());
        for addr in all {
            let fresh = !self.pending.contains_key(&addr) && !out.contains(&addr);
            if addr != UNKNOWN_ADDRESS && fresh {
                out.push(addr);
            }
        }
        out
    }
}

impl<R: Rng + Send> WalkStrategy for RandomWalk<R> {
    fn name(&self) -> &'static str {
        "RandomWalk"
    }

    fn take_step(
        &mut self,
        now: Instant,
        peers: &mut PeerTable,
        contact: &mut dyn FnMut(SocketAddr),
    ) {
        self.expire(now, peers);

        if let Some(target) = self.config.target_peers {
            if peers.len() >= target {
                trace!(peers = peers.len(), target, "walk target reached");
                return;
            }
        }
        if self.pending.len() >= self.config.window_size {
            return;
        }

        let candidates = self.candidates(peers);
        let Some(&addr) = candidates.choose(&mut self.rng) else {
            return;
        };

        self.introduced.retain(|a| *a != addr);
        self.pending.insert(addr, now);
        debug!(%addr, outstanding = self.pending.len(), "walking to candidate");
        contact(addr);
    }

    fn on_response(&mut self, from: SocketAddr, introduced: Option<SocketAddr>) {
        self.pending.remove(&from);
        self.failures.remove(&from);

        if let Some(addr) = introduced {
            if addr != UNKNOWN_ADDRESS && addr != from && !self.introduced.contains(&addr) {
                if self.introduced.len() == MAX_INTRODUCED {
                    self.introduced.pop_front();
                }
                self.introduced.push_back(addr);
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

// ── RandomChurn ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RandomChurnConfig {
    /// Table entries inspected per step.
    pub sample_size: usize,
    /// Silence after which a peer is asked for an introduction again.
    pub inactive_time: Duration,
    /// Silence after which a peer is dropped from the table.
    pub drop_time: Duration,
    /// Minimum spacing between requests to the same address.
    pub ping_interval: Duration,
}

impl Default for RandomChurnConfig {
    fn default() -> Self {
        Self {
            sample_size: 8,
            inactive_time: Duration::from_millis(27_500),
            drop_time: Duration::from_millis(57_500),
            ping_interval: Duration::from_secs(10),
        }
    }
}

impl From<&WalkerConfig> for RandomChurnConfig {
    fn from(c: &WalkerConfig) -> Self {
        Self {
            sample_size: c.sample_size.max(1),
            inactive_time: c.inactive_time(),
            drop_time: c.drop_time(),
            ping_interval: c.ping_interval(),
        }
    }
}

/// Keeps the table honest. Each step looks at a random sample of peers:
/// those silent past `drop_time` are removed, those silent past
/// `inactive_time` get an introduction request. Any verified message from a
/// peer refreshes its `last_seen`, so only truly quiet peers go.
pub struct RandomChurn<R = StdRng> {
    config: RandomChurnConfig,
    /// Last request sent to each quiet address.
    contacted: BTreeMap<SocketAddr, Instant>,
    rng: R,
}

impl RandomChurn<StdRng> {
    pub fn new(config: RandomChurnConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng + Send> RandomChurn<R> {
    pub fn with_rng(config: RandomChurnConfig, rng: R) -> Self {
        Self {
            config,
            contacted: BTreeMap::new(),
            rng,
        }
    }

    pub fn config(&self) -> &RandomChurnConfig {
        &self.config
    }
}

impl<R: Rng + Send> WalkStrategy for RandomChurn<R> {
    fn name(&self) -> &'static str {
        "RandomChurn"
    }

    fn take_step(
        &mut self,
        now: Instant,
        peers: &mut PeerTable,
        contact: &mut dyn FnMut(SocketAddr),
    ) {
        let mut dead = Vec::new();
        let mut quiet = Vec::new();
        for peer in peers.sample(self.config.sample_size, &mut self.rng) {
            let silent = now.saturating_duration_since(peer.last_seen);
            if silent >= self.config.drop_time {
                dead.push(*peer.public_key());
            } else if silent >= self.config.inactive_time {
                quiet.push(peer.address);
            }
        }

        for key in dead {
            if let Some(peer) = peers.remove(&key) {
                self.contacted.remove(&peer.address);
                info!(peer = peer.short_id(), addr = %peer.address, "dropping silent peer");
            }
        }

        let interval = self.config.ping_interval;
        for addr in quiet {
            let due = self
                .contacted
                .get(&addr)
                .map_or(true, |sent| now.saturating_duration_since(*sent) >= interval);
            if due {
                self.contacted.insert(addr, now);
                debug!(%addr, "contacting inactive peer");
                contact(addr);
            }
        }

        // Forget addresses that left the table by any route.
        self.contacted.retain(|addr, _| peers.contains_address(*addr));
    }

    fn on_response(&mut self, from: SocketAddr, _introduced: Option<SocketAddr>) {
        self.contacted.remove(&from);
    }

    fn outstanding(&self) -> usize {
        self.contacted.len()
    }
}
