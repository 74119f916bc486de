//! Overlay integration test harness.
//!
//! Communities run in-process on a simulated network: every node owns a
//! `MemoryTransport` and the harness carries datagrams between them. Time
//! is passed explicitly, so every scenario is deterministic.
//!
//!   cargo test --test integration
//!
//! Each test builds its own network. Nothing is shared between tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use overlay_community::{
    Community, CommunityContext, CommunityHooks, CommunitySettings, Delivery, MemoryTransport,
    Overlay, Route,
};
use overlay_core::crypto::Keypair;
use overlay_core::{FieldCode, FormatError, Payload, Unpacked, Value, ValueReader};

mod discovery;
mod lamport;
mod messaging;
mod robustness;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

pub struct Node<H: CommunityHooks> {
    pub community: Community<H>,
    pub transport: Arc<MemoryTransport>,
    pub keypair: Arc<Keypair>,
}

/// A set of nodes that can reach each other by address.
pub struct Network<H: CommunityHooks> {
    pub nodes: Vec<Node<H>>,
    pub now: Instant,
    /// Datagrams addressed to nobody on this network.
    pub lost: usize,
}

impl<H: CommunityHooks> Network<H> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            now: Instant::now(),
            lost: 0,
        }
    }

    /// Build and start a node listening on `port`. Returns its index.
    pub fn spawn(&mut self, port: u16, hooks: H, settings: CommunitySettings) -> usize {
        let transport = Arc::new(MemoryTransport::new(addr(port)));
        let keypair = Arc::new(Keypair::generate());
        let mut community = Community::new(
            hooks,
            keypair.clone(),
            transport.clone(),
            settings.with_seed(port as u64),
            self.now,
        )
        .expect("community should build");
        community.start(self.now).expect("community should start");
        self.nodes.push(Node {
            community,
            transport,
            keypair,
        });
        self.nodes.len() - 1
    }

    pub fn node(&self, index: usize) -> &Community<H> {
        &self.nodes[index].community
    }

    pub fn node_mut(&mut self, index: usize) -> &mut Community<H> {
        &mut self.nodes[index].community
    }

    /// Deliver everything currently in flight once. Replies produced by
    /// these deliveries stay queued for the next round.
    pub fn deliver_round(&mut self) -> Vec<Delivery> {
        let mut in_flight = Vec::new();
        for node in &self.nodes {
            in_flight.extend(node.transport.drain());
        }
        let mut outcomes = Vec::new();
        for datagram in in_flight {
            match self
                .nodes
                .iter_mut()
                .find(|n| n.transport.local_addr() == datagram.to)
            {
                Some(node) => {
                    let outcome = node.community.deliver(datagram.from, &datagram.data, self.now);
                    outcomes.push(outcome);
                }
                None => self.lost += 1,
            }
        }
        outcomes
    }

    /// Deliver rounds until the network is quiet or `max_rounds` have run.
    pub fn settle(&mut self, max_rounds: usize) -> usize {
        for round in 0..max_rounds {
            if self.in_flight() == 0 {
                return round;
            }
            self.deliver_round();
        }
        max_rounds
    }

    pub fn in_flight(&self) -> usize {
        self.nodes.iter().map(|n| n.transport.pending()).sum()
    }

    /// Advance time by `step`, run due tasks on every node, then deliver
    /// one round.
    pub fn tick(&mut self, step: Duration) {
        self.now += step;
        for node in self.nodes.iter_mut() {
            node.community.poll(self.now);
        }
        self.deliver_round();
    }
}

// ── Shared application ────────────────────────────────────────────────────────

pub const COUNT_MESSAGE: u8 = 1;

/// A single unsigned 32-bit counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count(pub u32);

impl Payload for Count {
    const FORMAT: &'static [FieldCode] = &[FieldCode::U32];

    fn to_values(&self) -> Vec<Value> {
        vec![Value::U32(self.0)]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, FormatError> {
        let mut r = ValueReader::new(values);
        let n = r.u32()?;
        r.finish()?;
        Ok(Self(n))
    }
}

/// Records every counter it receives, with the sender's global time and
/// the local clock right after the message was accepted.
#[derive(Debug, Default)]
pub struct Tally {
    pub received: Vec<Received>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub from: SocketAddr,
    pub value: u32,
    pub sender_time: u64,
    pub clock_after: u64,
}

impl Tally {
    fn on_count(
        &mut self,
        ctx: &mut CommunityContext<Self>,
        from: SocketAddr,
        message: Unpacked<Count>,
    ) -> anyhow::Result<()> {
        self.received.push(Received {
            from,
            value: message.body.0,
            sender_time: message.dist.global_time,
            clock_after: ctx.global_time(),
        });
        Ok(())
    }
}

impl CommunityHooks for Tally {
    fn handlers(&self) -> Vec<Route<Self>> {
        vec![Route::new(COUNT_MESSAGE, "count", Self::on_count)]
    }
}
