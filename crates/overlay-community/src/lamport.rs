//! Lamport clock community: the example application.
//!
//! Each instance keeps its own logical clock. Once it knows at least one
//! peer it sends its clock to everyone; every clock message received bumps
//! the local clock past the remote one, is recorded, and is answered with
//! the new value. The recorded observations are therefore strictly
//! increasing.

use std::net::SocketAddr;
use std::time::Duration;

use overlay_core::wire::{service_id, ServiceId};
use overlay_core::{FieldCode, FormatError, Payload, Unpacked, Value, ValueReader};
use tracing::{debug, info};

use crate::community::{CommunityContext, Route};
use crate::service::CommunityHooks;

pub const CLOCK_MESSAGE: u8 = 1;

/// Task that keeps trying to reach the first peer.
pub const START_TASK: &str = "start_communication";

/// Descriptor name used in configuration.
pub const DESCRIPTOR: &str = "LamportCommunity";

/// Service id shared by every Lamport community.
pub fn lamport_service_id() -> ServiceId {
    service_id(b"overlay.example.lamport")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockMessage {
    pub clock: u64,
}

impl Payload for ClockMessage {
    const FORMAT: &'static [FieldCode] = &[FieldCode::U64];

    fn to_values(&self) -> Vec<Value> {
        vec![Value::U64(self.clock)]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, FormatError> {
        let mut r = ValueReader::new(values);
        let clock = r.u64()?;
        r.finish()?;
        Ok(Self { clock })
    }
}

#[derive(Debug)]
pub struct LamportCommunity {
    clock: u64,
    observations: Vec<u64>,
    interval: Duration,
}

impl Default for LamportCommunity {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl LamportCommunity {
    /// `interval` is how often the start task retries while no peer is known.
    pub fn new(interval: Duration) -> Self {
        Self {
            clock: 0,
            observations: Vec::new(),
            interval,
        }
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Clock values recorded on every received message, in order.
    pub fn observations(&self) -> &[u64] {
        &self.observations
    }

    /// Send our clock to every known peer, then stop retrying. Does nothing
    /// until the walk has found someone.
    fn start_communication(&mut self, ctx: &mut CommunityContext<Self>) -> anyhow::Result<()> {
        if ctx.peers().is_empty() {
            debug!(community = ctx.name(), "no peers yet, waiting");
            return Ok(());
        }
        let sent = ctx.broadcast(CLOCK_MESSAGE, &ClockMessage { clock: self.clock })?;
        info!(community = ctx.name(), clock = self.clock, peers = sent, "starting clock exchange");
        ctx.cancel_task(START_TASK);
        Ok(())
    }

    fn on_clock(
        &mut self,
        ctx: &mut CommunityContext<Self>,
        source: SocketAddr,
        message: Unpacked<ClockMessage>,
    ) -> anyhow::Result<()> {
        self.clock = self.clock.max(message.body.clock).saturating_add(1);
        self.observations.push(self.clock);
        debug!(
            community = ctx.name(),
            %source,
            remote = message.body.clock,
            clock = self.clock,
            "clock updated"
        );
        ctx.send(source, CLOCK_MESSAGE, &ClockMessage { clock: self.clock })?;
        Ok(())
    }
}

impl CommunityHooks for LamportCommunity {
    fn handlers(&self) -> Vec<Route<Self>> {
        vec![Route::new(CLOCK_MESSAGE, "clock", Self::on_clock)]
    }

    fn started(&mut self, ctx: &mut CommunityContext<Self>) -> anyhow::Result<()> {
        ctx.register_periodic(START_TASK, self.interval, true, Self::start_communication)?;
        Ok(())
    }

    /// `start_communication` sends the clock right away instead of waiting
    /// for the next tick.
    fn perform(&mut self, action: &str, ctx: &mut CommunityContext<Self>) -> anyhow::Result<bool> {
        match action {
            START_TASK => {
                self.start_communication(ctx)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
